use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!(
        "{}",
        serde_yaml::to_string(&workspaces_controller::resources::workspaces::Workspace::crd())?
    );
    Ok(())
}
