use cim_core::Result;

/// Whether the process runs with an effective uid of root
pub fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Unix has no per-token privileges to switch on; descriptors are read
/// with whatever access the process already has.
pub fn enable_image_privileges() -> Result<()> {
    if !is_elevated() {
        log::debug!("Not running as root; ownership of materialized entries is not replayed");
    }
    Ok(())
}
