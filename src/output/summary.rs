use std::fmt::Write;

use cidag::graph::{max_nodes, LayersView, Link};
use cidag::seed::{SeedReport, StageSeed};
use comfy_table::Cell;

use super::styling::{count, failure, heading, job_name, label, ok};
use super::tables::{
    color_coded_inclusion_cell, create_cyan_header, create_table, deployment_cell,
};

/// Prints the layered view of a pipeline to stdout.
pub fn print_layers(view: &LayersView) {
    println!("{}", render_layers(view));
}

/// Prints reduced links as a source/target table.
pub fn print_links(links: &[Link]) {
    println!("{}", render_links(links));
}

/// Prints seeded stages, their builds and any configuration errors.
///
/// `stage_seeds` is used for the included/declared ratio per stage; stages
/// without included builds are still listed there.
pub fn print_seed(report: &SeedReport, stage_seeds: &[StageSeed<'_>]) {
    println!("{}", render_seed(report, stage_seeds));
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", emoji, heading(title));
}

fn render_layers(view: &LayersView) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🧱", "Layers");
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n  {} {}\n",
        label("Groups:"),
        count(view.num_groups),
        label("Layers:"),
        count(view.pipeline_layers.len()),
        label("Widest layer:"),
        count(max_nodes(&view.pipeline_layers)),
    );

    let mut table = create_table();
    table.set_header(create_cyan_header(&["Layer", "Groups"]));
    for (index, layer) in view.pipeline_layers.iter().enumerate() {
        table.add_row(vec![Cell::new(index), Cell::new(layer.join("\n"))]);
    }
    let _ = writeln!(output, "{table}\n");

    output.push_str(&render_links(&view.links_data));
    output
}

fn render_links(links: &[Link]) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🔗", "Links");
    if links.is_empty() {
        let _ = writeln!(output, "  {}", label("No links"));
        return output;
    }

    let mut table = create_table();
    table.set_header(create_cyan_header(&["Needed", "Needed by"]));
    for link in links {
        table.add_row(vec![Cell::new(&link.source), Cell::new(&link.target)]);
    }
    let _ = writeln!(output, "{table}");
    output
}

fn render_seed(report: &SeedReport, stage_seeds: &[StageSeed<'_>]) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "🌱", "Seed");
    let _ = writeln!(
        output,
        "  {} {}\n  {} {}\n",
        label("Ref:"),
        job_name(&report.ref_),
        label("Builds to create:"),
        count(report.size),
    );

    let mut stages = create_table();
    stages.set_header(create_cyan_header(&["Stage", "Included", "Builds"]));
    for stage in stage_seeds {
        let included = stage.seeds_names().unwrap_or_default();
        stages.add_row(vec![
            Cell::new(stage.name()),
            color_coded_inclusion_cell(included.len(), stage.all_seeds().len()),
            Cell::new(included.join("\n")),
        ]);
    }
    let _ = writeln!(output, "{stages}\n");

    let deployments: Vec<_> = report
        .stages
        .iter()
        .flat_map(|stage| &stage.builds)
        .filter_map(|build| {
            build
                .environment
                .as_ref()
                .map(|environment| (build, environment))
        })
        .collect();

    if !deployments.is_empty() {
        add_section_header(&mut output, "🚀", "Environments");
        let mut table = create_table();
        table.set_header(create_cyan_header(&["Build", "Environment", "Action"]));
        for (build, environment) in deployments {
            table.add_row(vec![
                Cell::new(&build.name),
                deployment_cell(Some(&environment.name), build.deployment.is_some()),
                Cell::new(format!("{:?}", environment.action).to_lowercase()),
            ]);
        }
        let _ = writeln!(output, "{table}\n");
    }

    match &report.errors {
        Some(errors) => {
            add_section_header(&mut output, "⚠️", "Errors");
            for error in errors {
                let _ = writeln!(output, "  {} {}", failure("✗"), error);
            }
        }
        None => {
            let _ = writeln!(output, "{} {}", ok("✓"), label("No configuration errors"));
        }
    }

    output
}
