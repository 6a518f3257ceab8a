//! Connection configuration

use crate::capability::Capability;
use crate::error::{Error, Result};
use murmur_crypto::KeyPair;
use murmur_log::{MemoryStorage, Storage};
use std::fmt;
use std::sync::Arc;

/// Smallest replication frame that still carries every handshake message
pub const MIN_FRAME_SIZE: usize = 1024;

/// What the data-phase read loop does after an entry fails verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VerifyFailurePolicy {
    /// Report the failure, then end the readable side
    #[default]
    Halt,
    /// Report the failure and continue with the next entry
    Skip,
}

/// Connection configuration
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Long-term identity; generated at construction when `None`
    pub identity: Option<KeyPair>,

    /// Declared capabilities (deduplicated and sorted at construction)
    pub capabilities: Vec<Capability>,

    /// Factory for every log the connection opens
    pub storage: Arc<dyn Storage>,

    /// Keep received entries instead of evicting them after reading
    pub preserve_receiver: bool,

    /// Keep sent entries instead of evicting them once uploaded
    pub preserve_sender: bool,

    /// Keep the writable side open after the remote closed
    pub allow_half_open: bool,

    /// Read loop behavior on a rejected entry
    pub on_verify_failure: VerifyFailurePolicy,

    /// Decrypted messages buffered ahead of [`crate::Connection::read`]
    pub read_buffer: usize,

    /// Upper bound on a single replication frame
    pub max_frame_size: usize,
}

impl ConnectionConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for a zero read buffer or a frame
    /// bound below [`MIN_FRAME_SIZE`].
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer == 0 {
            return Err(Error::Configuration("read_buffer must be at least 1".into()));
        }
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(Error::Configuration(
                format!("max_frame_size must be at least {MIN_FRAME_SIZE} bytes").into(),
            ));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            identity: None,
            capabilities: Vec::new(),
            storage: Arc::new(MemoryStorage),
            preserve_receiver: false,
            preserve_sender: false,
            allow_half_open: false,
            on_verify_failure: VerifyFailurePolicy::default(),
            read_buffer: 64,
            max_frame_size: murmur_log::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("identity", &self.identity)
            .field("capabilities", &self.capabilities)
            .field("preserve_receiver", &self.preserve_receiver)
            .field("preserve_sender", &self.preserve_sender)
            .field("allow_half_open", &self.allow_half_open)
            .field("on_verify_failure", &self.on_verify_failure)
            .field("read_buffer", &self.read_buffer)
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}
