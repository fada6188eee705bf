use depot_util::Configuration;
use nix::unistd::{setgroups, setresgid, setresuid, Uid, User};

use crate::error::{AcquireError, Result};

/// Switch to the configured sandbox user when running as root:
/// supplementary groups first, then gid, then uid, each verified.
/// The identity-bearing environment is scrubbed unless configured off.
pub fn drop_privileges(config: &Configuration) -> Result<()> {
    let sandbox_user = config.find("Sandbox::User", "");
    if sandbox_user.is_empty() || sandbox_user == "root" {
        return Ok(());
    }
    if !Uid::effective().is_root() {
        return Ok(());
    }

    let Some(user) = User::from_name(&sandbox_user)
        .map_err(|e| AcquireError::Other(format!("looking up user {sandbox_user}: {e}")))?
    else {
        tracing::warn!(user = %sandbox_user, "sandbox user does not exist, keeping privileges");
        return Ok(());
    };

    setgroups(&[user.gid])
        .map_err(|e| AcquireError::Other(format!("setgroups for {sandbox_user}: {e}")))?;
    setresgid(user.gid, user.gid, user.gid)
        .map_err(|e| AcquireError::Other(format!("setresgid for {sandbox_user}: {e}")))?;
    setresuid(user.uid, user.uid, user.uid)
        .map_err(|e| AcquireError::Other(format!("setresuid for {sandbox_user}: {e}")))?;

    // verify the switch is irreversible
    if setresuid(Uid::from_raw(0), Uid::from_raw(0), Uid::from_raw(0)).is_ok() {
        return Err(AcquireError::Other(
            "privilege drop could be reverted".into(),
        ));
    }

    if config.find_bool("Sandbox::ResetEnvironment", true) {
        // single-threaded method startup, before any worker spawns
        unsafe {
            std::env::set_var("HOME", &user.dir);
            std::env::set_var("USER", &user.name);
            std::env::set_var("LOGNAME", &user.name);
            std::env::set_var("SHELL", "/bin/sh");
            for var in ["TMPDIR", "TMP", "TEMP", "TEMPDIR"] {
                std::env::remove_var(var);
            }
        }
    }

    tracing::debug!(user = %sandbox_user, "dropped privileges");
    Ok(())
}
