//! Prints the firewall CRD manifests as a multi-document YAML stream.

use crds::{IP, NAT, Security};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let manifests = [IP::crd(), NAT::crd(), Security::crd()];
    let docs = manifests
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    print!("{}", docs.join("---\n"));
    Ok(())
}
