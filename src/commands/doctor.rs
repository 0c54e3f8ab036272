use std::path::Path;

use anyhow::Result;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::config::resolve_config;
use crate::toolchain::{Tool, ToolStatus, Toolchain};

/// Which deploy targets each tool serves.
fn used_by(tool: Tool) -> &'static str {
    match tool {
        Tool::Node | Tool::Npm | Tool::Wrangler => "pages",
        Tool::Python3 | Tool::Pip => "python",
        Tool::Php | Tool::Composer => "php",
        Tool::Cargo | Tool::Rustc => "rust",
        Tool::Go => "go",
        Tool::Java | Tool::Gradle | Tool::AndroidSdk => "android",
    }
}

pub fn render_table(statuses: &[ToolStatus], use_color: bool) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Tool").set_alignment(CellAlignment::Left),
        Cell::new("Used by").set_alignment(CellAlignment::Left),
        Cell::new("Status").set_alignment(CellAlignment::Center),
        Cell::new("Version / setup").set_alignment(CellAlignment::Left),
    ]);

    for status in statuses {
        let (mark, detail) = if status.available {
            let mark = if use_color {
                "ok".green().to_string()
            } else {
                "ok".to_string()
            };
            (mark, status.version.clone().unwrap_or_default())
        } else {
            let mark = if use_color {
                "missing".red().to_string()
            } else {
                "missing".to_string()
            };
            (mark, status.tool.remediation().to_string())
        };
        table.add_row(vec![
            Cell::new(status.tool.name()),
            Cell::new(used_by(status.tool)),
            Cell::new(mark).set_alignment(CellAlignment::Center),
            Cell::new(detail),
        ]);
    }
    table
}

pub async fn run(config_file: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_file)?;
    let toolchain = Toolchain::new(config.timeouts.probe(), config.android.android_home.clone());
    let statuses = toolchain.probe_all().await;
    let use_color = std::io::stdout().is_terminal();

    println!();
    if use_color {
        println!("  {}", "shipwright doctor".bold());
    } else {
        println!("  shipwright doctor");
    }
    println!();
    println!("{}", render_table(&statuses, use_color));

    let missing = statuses.iter().filter(|s| !s.available).count();
    println!();
    if missing == 0 {
        println!("All toolchains found.");
    } else {
        println!(
            "{} of {} tools missing. Deploys needing them fail with setup instructions.",
            missing,
            statuses.len()
        );
    }
    Ok(())
}
