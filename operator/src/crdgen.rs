use kube::CustomResourceExt;

fn main() {
    for crd in [
        controller::Nova::crd(),
        controller::NovaCell::crd(),
        controller::NovaAPI::crd(),
    ] {
        println!("---");
        match serde_yaml::to_string(&crd) {
            Ok(yaml) => print!("{yaml}"),
            Err(e) => {
                eprintln!("Failed to serialize {}: {e}", crd.spec.names.kind);
                std::process::exit(1);
            }
        }
    }
}
