//! # CRD Generator
//!
//! Prints the `ImageRegistry` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/imageregistry.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::CustomResourceExt;
use registry_storage_operator::crd::ImageRegistry;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&ImageRegistry::crd())?);
    Ok(())
}
