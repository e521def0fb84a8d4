/// Offline listing validation tool
/// Tests: listing text → records → tree → aggregation without a Docker daemon
use std::io::Read;

use volscope::listing::{self, ListingOptions};
use volscope::tree::{self, format_size};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("volscope=info".parse()?),
        )
        .init();

    // debug-listing [FILE|-] [STRIP_PREFIX]
    let source = std::env::args().nth(1).unwrap_or_else(|| "-".to_string());
    let strip_prefix = std::env::args()
        .nth(2)
        .unwrap_or_else(|| listing::DEFAULT_MOUNT_POINT.to_string());

    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(&source)?
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║             VOLSCOPE LISTING VALIDATION TOOL                 ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Source: {}", source);
    println!("Prefix: {}", strip_prefix);
    println!();

    // === STAGE 1: PARSE ===
    println!("┌─ STAGE 1: PARSE LISTING ───────────────────────────────────┐");
    let options = ListingOptions {
        strip_prefix,
        ..ListingOptions::default()
    };
    let start = std::time::Instant::now();
    let parsed = listing::parse_listing_with(&text, &options);
    let parse_duration = start.elapsed();

    let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
    println!("  ✓ Parsed in {:.2}ms", parse_duration.as_secs_f64() * 1000.0);
    println!("  ✓ Lines:    {} ({} skipped)", lines, parsed.skipped);
    println!("└────────────────────────────────────────────────────────────┘");
    println!();

    let mut tree = parsed.tree;
    if tree.len() <= 1 {
        println!("✗ Listing produced an empty tree");
        return Ok(());
    }

    // === STAGE 2: TREE VALIDATION ===
    println!("┌─ STAGE 2: TREE VALIDATION ─────────────────────────────────┐");
    let dir_count = tree.iter().filter(|(_, n)| n.is_dir).count();
    let synthesized = tree.iter().filter(|(_, n)| n.synthesized).count();
    println!("  ✓ Nodes:    {} ({} dirs, {} synthesized)", tree.len(), dir_count, synthesized);
    println!("  ✓ Total:    {}", format_size(tree.total_size()));

    let mut errors = 0;
    for (id, node) in tree.iter() {
        let children: u64 = tree
            .children(id)
            .filter_map(|child| tree.get(child))
            .map(|child| child.size)
            .sum();
        let mut problem = None;
        if node.is_dir && node.size != node.own_size + children {
            problem = Some(format!(
                "size {} != own {} + children {}",
                node.size, node.own_size, children
            ));
        } else if tree.lookup(&node.path) != Some(id) {
            problem = Some("path index does not resolve to this node".to_string());
        } else if let Some(parent) = node.parent.and_then(|p| tree.get(p)) {
            if parent.depth + 1 != node.depth {
                problem = Some(format!("depth {} under parent depth {}", node.depth, parent.depth));
            }
        }

        if let Some(problem) = problem {
            println!("  ✗ '{}': {}", node.path, problem);
            errors += 1;
            if errors >= 5 {
                println!("  ... (truncated, too many errors)");
                break;
            }
        }
    }
    if errors == 0 {
        println!("  ✓ Tree structure valid (sizes aggregate, index consistent)");
    }
    println!("└────────────────────────────────────────────────────────────┘");
    println!();

    // === STAGE 3: SUMMARY ===
    println!("┌─ STAGE 3: CONTENT SUMMARY ─────────────────────────────────┐");
    tree.sort_children_by_size();
    println!("  Top-level entries:");
    for child in tree.children(tree.root).take(10) {
        if let Some(node) = tree.get(child) {
            let suffix = if node.is_dir { "/" } else { "" };
            println!("    {:>10}  {}{}", format_size(node.size), node.name, suffix);
        }
    }
    println!("  Largest files:");
    for id in tree::largest_files(&tree, 10) {
        if let Some(node) = tree.get(id) {
            println!("    {:>10}  {}", format_size(node.size), node.path);
        }
    }
    println!("└────────────────────────────────────────────────────────────┘");

    Ok(())
}
