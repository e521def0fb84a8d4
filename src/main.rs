use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use volscope::catalog::{SizeMode, VolumeCatalog, VolumeSummary};
use volscope::config::AnalyzerConfig;
use volscope::runtime::DockerCli;
use volscope::tree::{self, format_size, FileTree, NodeId};

#[derive(Parser, Debug)]
#[command(name = "volscope")]
#[command(about = "Inspect Docker volumes: sizes, contents and the containers using them")]
#[command(version)]
struct Cli {
    /// Docker client binary
    #[arg(long, env = "VOLSCOPE_DOCKER", default_value = "docker", global = true)]
    docker: String,

    /// Image used for inspection sandboxes
    #[arg(long, env = "VOLSCOPE_IMAGE", default_value = "alpine", global = true)]
    image: String,

    /// Seconds a volume size stays cached
    #[arg(long, env = "VOLSCOPE_SIZE_TTL", default_value_t = 60, global = true)]
    size_ttl: u64,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List volumes with size and attached containers
    List {
        /// Report sizes in bytes instead of du-style units
        #[arg(long)]
        bytes: bool,
    },
    /// Print the sizes of the given volumes
    Size {
        #[arg(required = true)]
        volumes: Vec<String>,
        #[arg(long)]
        bytes: bool,
    },
    /// Show the contents of a volume as a size-sorted tree
    Tree {
        volume: String,
        /// Maximum depth to print
        #[arg(long, default_value_t = 3)]
        depth: u16,
        /// Also list the N largest files
        #[arg(long, default_value_t = 0)]
        top: usize,
        /// Count directory entries' own blocks in the totals
        #[arg(long)]
        count_dirs: bool,
    },
    /// Remove a volume
    Rm { volume: String },
    /// Delete a file or directory inside a volume
    RmFile { volume: String, path: String },
}

fn size_mode(bytes: bool) -> SizeMode {
    if bytes {
        SizeMode::Bytes
    } else {
        SizeMode::Human
    }
}

fn print_volumes(volumes: &std::collections::BTreeMap<String, VolumeSummary>) {
    println!("{:<32} {:>10}  {:<20}  CONTAINERS", "VOLUME", "SIZE", "CREATED");
    for volume in volumes.values() {
        let created = volume
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let containers: Vec<String> = volume
            .containers
            .iter()
            .map(|a| {
                format!(
                    "{}:{}{}",
                    a.container_name,
                    a.mountpoint,
                    if a.rw { "" } else { " (ro)" }
                )
            })
            .collect();
        println!(
            "{:<32} {:>10}  {:<20}  {}",
            volume.name,
            volume.size,
            created,
            containers.join(", ")
        );
    }
}

fn print_tree(tree: &FileTree, id: NodeId, max_depth: u16) {
    let Some(node) = tree.get(id) else {
        return;
    };
    if node.depth > 0 {
        let indent = "  ".repeat(usize::from(node.depth - 1));
        let suffix = if node.is_dir { "/" } else { "" };
        println!(
            "{:>10}  {}  {} {}{}{}",
            format_size(node.size),
            node.modified_at.format("%Y-%m-%d %H:%M"),
            node.mode,
            indent,
            node.name,
            suffix
        );
    }
    if node.depth >= max_depth {
        return;
    }
    for child in tree.children(id) {
        print_tree(tree, child, max_depth);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "volscope=debug" } else { "volscope=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.parse()?),
        )
        .init();

    let config = AnalyzerConfig {
        docker_bin: cli.docker,
        sandbox_image: cli.image,
        size_ttl: Duration::from_secs(cli.size_ttl),
        count_directory_size: matches!(cli.command, Commands::Tree { count_dirs: true, .. }),
        ..AnalyzerConfig::default()
    };
    tracing::debug!("Configuration: {:?}", config);

    let runtime = DockerCli::from_config(&config);
    let mut catalog = VolumeCatalog::new(runtime, config);

    match cli.command {
        Commands::List { bytes } => {
            let volumes = catalog.volumes(size_mode(bytes))?;
            print_volumes(&volumes);
        }
        Commands::Size { volumes, bytes } => {
            let sizes = catalog.volume_sizes(volumes.as_slice(), size_mode(bytes))?;
            for (name, size) in sizes {
                println!("{size}\t{name}");
            }
        }
        Commands::Tree {
            volume, depth, top, ..
        } => {
            let mut tree = catalog.volume_tree(&volume);
            tree.sort_children_by_size();
            println!("{}: {} in {} entries", volume, format_size(tree.total_size()), tree.len() - 1);
            print_tree(&tree, tree.root, depth);

            if top > 0 {
                println!();
                println!("Largest files:");
                for id in tree::largest_files(&tree, top) {
                    if let Some(node) = tree.get(id) {
                        println!("{:>10}  {}", format_size(node.size), node.path);
                    }
                }
            }
        }
        Commands::Rm { volume } => {
            if !catalog.remove_volume(&volume) {
                bail!("could not remove volume '{}'", volume);
            }
            println!("Removed volume {volume}");
        }
        Commands::RmFile { volume, path } => {
            let mut tree = catalog.volume_tree(&volume);
            let Some(node) = tree.node(&path) else {
                bail!("'{}' not found in volume '{}'", path, volume);
            };
            let what = if node.is_dir { "directory" } else { "file" };
            match catalog.delete_file_and_prune(&volume, &mut tree, &path) {
                Some(removal) => println!(
                    "Deleted {} {} ({} entries, {}); volume now holds {}",
                    what,
                    path,
                    removal.nodes,
                    format_size(removal.bytes),
                    format_size(tree.total_size())
                ),
                None => bail!("could not delete '{}' from volume '{}'", path, volume),
            }
        }
    }

    Ok(())
}
