//! Builds the `tracexec-ebpf` kernel probe as part of this crate's build,
//! the standard aya workaround for cargo's lack of artifact-dependency
//! support for a `no_std` sibling target (see the `tracexec-ebpf` dependency
//! comment in Cargo.toml).

use anyhow::{anyhow, Context as _};
use aya_build::cargo_metadata;

fn main() -> anyhow::Result<()> {
    let cargo_metadata::Metadata { packages, .. } = cargo_metadata::MetadataCommand::new()
        .no_deps()
        .exec()
        .context("failed to run cargo metadata")?;
    let ebpf_package = packages
        .into_iter()
        .find(|p| p.name == "tracexec-ebpf")
        .ok_or_else(|| anyhow!("tracexec-ebpf package not found in workspace metadata"))?;
    aya_build::build_ebpf([ebpf_package])
}
