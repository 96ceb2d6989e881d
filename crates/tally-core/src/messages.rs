//! User-facing message catalog.
//!
//! Every terminal recognition outcome maps to one spoken message. The
//! artifact key is the stable cache identity: per-person keys for welcome
//! and duplicate notices, shared fixed keys for the impersonal prompts.

/// A spoken message tied to a recognition or registration outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// First accepted recognition of the day.
    Welcome { name: String },
    /// Already recorded today.
    Duplicate { name: String },
    /// Nearest match was beyond the acceptance threshold.
    Unrecognized,
    /// No usable face in the capture.
    FaceNotDetected,
    /// The gallery has no registered identities yet.
    GalleryEmpty,
}

impl Message {
    /// Stable artifact cache key for this message.
    pub fn artifact_key(&self) -> String {
        match self {
            Message::Welcome { name } => format!("welcome_{}", slug(name)),
            Message::Duplicate { name } => format!("duplicate_{}", slug(name)),
            Message::Unrecognized => "unrecognized".to_string(),
            Message::FaceNotDetected => "face_not_detected".to_string(),
            Message::GalleryEmpty => "gallery_empty".to_string(),
        }
    }

    /// Text handed to the speech synthesizer.
    pub fn text(&self) -> String {
        match self {
            Message::Welcome { name } => {
                format!("Welcome, {name}. Your attendance has been recorded.")
            }
            Message::Duplicate { name } => {
                format!("{name}, you have already checked in today. Have a good day.")
            }
            Message::Unrecognized => {
                "Your face is not registered in the system. Please contact an administrator."
                    .to_string()
            }
            Message::FaceNotDetected => "No face detected. Please try again.".to_string(),
            Message::GalleryEmpty => {
                "The system has no registered faces yet. Please contact an administrator."
                    .to_string()
            }
        }
    }
}

/// Filesystem- and key-safe slug for a display name: every run of
/// non-alphanumeric characters collapses to a single underscore.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_underscore = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("unknown");
    }
    out
}
