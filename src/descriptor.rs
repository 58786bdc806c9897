use std::sync::{RwLock, RwLockReadGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub motd: String,
    pub version_text: String,
    pub protocol: i32,
    pub kick_message: String,
    pub player_max: u32,
    pub player_online: u32,
    pub samples: Vec<String>,
    /// Pre-encoded `data:image/png;base64,...` URI.
    pub icon: Option<String>,
    pub show_hostname: bool,
}

impl Default for ServerDescriptor {
    fn default() -> Self {
        Self {
            motd: String::new(),
            version_text: String::new(),
            protocol: 2,
            kick_message: String::new(),
            player_max: 0,
            player_online: 0,
            samples: Vec::new(),
            icon: None,
            show_hostname: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartingText {
    pub motd: String,
    pub version_text: String,
    pub kick_message: String,
}

impl Default for StartingText {
    fn default() -> Self {
        Self {
            motd: "§4Server is starting!\n§aPlease wait patiently".to_string(),
            version_text: "Starting".to_string(),
            kick_message: "§bServer is already starting!\n§bPlease wait few minutes".to_string(),
        }
    }
}

impl ServerDescriptor {
    pub fn apply_starting(&mut self, starting: &StartingText) {
        self.motd = starting.motd.clone();
        self.version_text = starting.version_text.clone();
        self.kick_message = starting.kick_message.clone();
    }
}

#[derive(Debug)]
pub struct DescriptorCell {
    current: RwLock<ServerDescriptor>,
    configured: ServerDescriptor,
}

impl DescriptorCell {
    pub fn new(descriptor: ServerDescriptor) -> Self {
        Self {
            current: RwLock::new(descriptor.clone()),
            configured: descriptor,
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ServerDescriptor> {
        // Fields are plain values, a poisoned guard is still consistent.
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> ServerDescriptor {
        self.read().clone()
    }

    pub fn kick_message(&self) -> String {
        self.read().kick_message.clone()
    }

    pub fn show_hostname(&self) -> bool {
        self.read().show_hostname
    }

    pub fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut ServerDescriptor),
    {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut guard);
    }

    pub fn restore_configured(&self) {
        let configured = self.configured.clone();
        self.update(move |descriptor| *descriptor = configured);
    }
}
