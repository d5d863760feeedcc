//! Refuse to run with superuser privileges.
//!
//! The appliance escalates only for individual modem commands (via `sudo`),
//! never as a whole.

use nix::unistd::Uid;

use crate::error::StartupError;

/// Check the current process identity.
pub fn ensure_unprivileged() -> Result<(), StartupError> {
    check(Uid::effective(), std::env::var_os("SUDO_UID").is_some())
}

fn check(euid: Uid, via_sudo: bool) -> Result<(), StartupError> {
    if euid.is_root() {
        return Err(StartupError::Privileged("effective uid is 0".to_string()));
    }
    if via_sudo {
        return Err(StartupError::Privileged("started through sudo".to_string()));
    }
    Ok(())
}
