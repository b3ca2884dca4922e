use kube::core::CustomResourceExt;
use oprc_fleet::crd::cluster::FleetCluster;
use oprc_fleet::crd::machine_pool::MachinePool;

fn main() {
    for crd in [MachinePool::crd(), FleetCluster::crd()] {
        let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
        println!("---\n{}", yaml);
    }
}
