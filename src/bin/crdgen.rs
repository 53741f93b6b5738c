use consul_merge_k8s::crd::{ConsulServiceIntentionsSource, ConsulServiceRoute};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let documents = [
        serde_yaml::to_string(&ConsulServiceRoute::crd())?,
        serde_yaml::to_string(&ConsulServiceIntentionsSource::crd())?,
    ];
    print!("{}", documents.join("---\n"));
    Ok(())
}
