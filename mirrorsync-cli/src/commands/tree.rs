//! `mirrorsync tree [path] [--runs N] [--json]`

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use mirrorsync_daemon::DaemonRequest;
use mirrorsync_sync::{NodeKind, NodeStatus, TreeNode, TreeView};

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Only show the sub-tree below this source-relative path.
    pub path: Option<String>,

    /// Fold the last N runs together instead of only the latest.
    #[arg(long)]
    pub runs: Option<u32>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl TreeArgs {
    pub fn run(self) -> Result<()> {
        let view: TreeView = super::call(DaemonRequest {
            path: self.path.clone(),
            window: self.runs,
            ..DaemonRequest::command("tree")
        })?;
        if self.json {
            return super::print_json(&view);
        }

        let mut out = String::new();
        render(&view.root, 0, &mut out);
        print!("{out}");
        println!(
            "{} files | {} directories | {}",
            view.stats.files,
            view.stats.directories,
            super::format_bytes(view.stats.total_size)
        );
        for aggregate in &view.aggregates {
            let c = &aggregate.counters;
            println!(
                "run {} recorded counters only: {} transferred, {} skipped, {} errors, {} conflicts",
                aggregate.run_id, c.files_transferred, c.files_skipped, c.errors, c.conflicts
            );
        }
        Ok(())
    }
}

fn render(node: &TreeNode, depth: usize, out: &mut String) {
    let name = if node.path.is_empty() { "." } else { &node.name };
    let suffix = if node.kind == NodeKind::Directory && !node.path.is_empty() {
        "/"
    } else {
        ""
    };
    out.push_str(&format!(
        "{}{} {name}{suffix}\n",
        "  ".repeat(depth),
        status_marker(node.status)
    ));
    for child in node.children.values() {
        render(child, depth + 1, out);
    }
}

fn status_marker(status: NodeStatus) -> String {
    match status {
        NodeStatus::Synced => "■".green().to_string(),
        NodeStatus::Unknown => "■".bright_black().to_string(),
        NodeStatus::Pending => "■".yellow().to_string(),
        NodeStatus::Conflict => "■".magenta().bold().to_string(),
        NodeStatus::Error => "■".red().bold().to_string(),
    }
}
