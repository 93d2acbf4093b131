use color_eyre::Result;
use lxc_bdev::{clone_and_copy, CloneRequest};
use simple_logger::SimpleLogger;

/// Clone an existing container's rootfs into a new one of the same
/// storage kind, the way `lxc-copy` would.
fn main() -> Result<()> {
    SimpleLogger::new().init()?;

    let mut request = CloneRequest::new(
        "/var/lib/lxc/alpine/rootfs",
        "alpine",
        "alpine-clone",
        "/var/lib/lxc",
    );
    request.snapshot = false;

    println!("Cloning alpine -> alpine-clone");
    let new_instance = clone_and_copy(&request)?;
    println!(
        "New instance ready: kind={:?} source={:?} target={:?}",
        new_instance.kind, new_instance.source, new_instance.target
    );
    Ok(())
}
