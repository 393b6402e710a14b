use tracing_subscriber::EnvFilter;
use vfs_stage::Tree;
use vfs_stage::fs::Loading;
use vfs_stage::sink::{DryRunSink, FileSystemSink, Sink};
use vfs_stage::vfs::VirtualTree;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let root = std::env::temp_dir().join("vfs_stage_hello");
    if root.exists() {
        std::fs::remove_dir_all(&root)?;
    }
    std::fs::create_dir_all(root.join("docs"))?;
    std::fs::write(root.join("docs/first.txt"), b"Hello")?;

    // nothing is read from disk until a file is accessed
    let mut tree = VirtualTree::from_dir(&root, Loading::Lazy)?;

    let mut update = tree.begin_update("/docs/first.txt")?;
    update.insert_left(5, ", World")?;
    tree.commit_update(update)?;
    tree.create("/second.txt", "World")?;
    tree.rename("/docs/first.txt", "/docs/greeting.txt")?;

    println!("staged files: {:?}", tree.find("**")?);

    // see what would happen first
    let mut dry_run = DryRunSink::new(&root);
    let reporter = dry_run.take_reporter().expect("reporter is taken once");
    dry_run.commit(&tree, false)?;
    for event in reporter {
        println!("{:>6} {}", event.kind(), event.path());
    }

    // then do it
    let mut sink = FileSystemSink::new(&root);
    sink.commit(&tree, false)?;

    let greeting = std::fs::read_to_string(root.join("docs/greeting.txt"))?;
    println!("{greeting}!");

    std::fs::remove_dir_all(&root)?;
    Ok(())
}
