/// Session controls, from the keyboard or the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    TogglePause,
    ForceSession,
    ResetStats,
    /// Dashboard only
    SetBreathingInterval(u64),
}

impl Command {
    /// Maps a `highgui::wait_key` code; letters are case-insensitive.
    pub fn from_key(key: i32) -> Option<Self> {
        if key < 0 {
            return None;
        }
        let c = char::from_u32((key & 0xFF) as u32)?.to_ascii_lowercase();
        match c {
            'q' => Some(Command::Quit),
            'p' => Some(Command::TogglePause),
            'f' => Some(Command::ForceSession),
            'r' => Some(Command::ResetStats),
            _ => None,
        }
    }
}

pub const HELP_LINE: &str = "Q:Quit P:Pause F:Force R:Reset";
