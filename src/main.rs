// Command-line front-end for working with DecisionBundles and DSL rules.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use glassbox::{
    DecisionBundle, DecisionBundleBuilder, Domain, DslEvaluator, DslParser, ExecutionContext,
    Result, Rule, RuleEngine,
};

#[derive(Parser)]
#[command(name = "glassbox", about = "GlassBox compliance SDK command line interface")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a DecisionBundle file
    Validate {
        /// DecisionBundle JSON file
        file: PathBuf,
    },
    /// Execute a DecisionBundle against context data
    Execute {
        /// DecisionBundle JSON file
        bundle: PathBuf,
        /// Context data JSON file
        #[arg(short, long)]
        context: Option<PathBuf>,
        /// Output results file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse a DSL rule (from a file or stdin)
    Parse {
        /// DSL file (stdin if not provided)
        file: Option<PathBuf>,
        /// Context data JSON file to evaluate against
        #[arg(short, long)]
        context: Option<PathBuf>,
        /// Output AST file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Create a new DecisionBundle interactively
    CreateBundle {
        /// Output file name
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List DecisionBundles in a directory
    ListBundles {
        /// Directory to search
        #[arg(default_value = ".")]
        directory: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = match &cli.command {
        Command::Validate { file } => validate_bundle(file, cli.verbose),
        Command::Execute {
            bundle,
            context,
            output,
        } => execute_bundle(bundle, context.as_deref(), output.as_deref(), cli.verbose),
        Command::Parse {
            file,
            context,
            output,
        } => parse_dsl(file.as_deref(), context.as_deref(), output.as_deref(), cli.verbose),
        Command::CreateBundle { output } => create_bundle(output.as_deref()),
        Command::ListBundles { directory } => list_bundles(directory),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("✗ {err}");
            ExitCode::FAILURE
        }
    }
}

fn validate_bundle(file: &Path, verbose: bool) -> Result<()> {
    let bundle = DecisionBundle::from_file(file)?;

    println!("✓ DecisionBundle is valid");
    println!("  Name: {}", bundle.metadata.name);
    println!("  Version: {}", bundle.version);
    println!("  Rules: {}", bundle.rules.len());
    println!("  Decisions: {}", bundle.decisions.len());
    println!("  Evidence: {}", bundle.evidence.len());

    if verbose {
        println!("\nMetadata:");
        println!("  id: {}", bundle.metadata.id);
        println!("  jurisdiction: {}", bundle.metadata.jurisdiction);
        println!("  domain: {}", bundle.metadata.domain);
        println!("  created: {}", bundle.metadata.created);
        if !bundle.metadata.tags.is_empty() {
            println!("  tags: {}", bundle.metadata.tags.join(", "));
        }

        println!("\nRules:");
        for rule in &bundle.rules {
            println!("  - {}: {} ({})", rule.id, rule.name, rule.rule_type);
        }
    }

    Ok(())
}

fn execute_bundle(
    bundle_path: &Path,
    context_path: Option<&Path>,
    output_path: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let bundle = DecisionBundle::from_file(bundle_path)?;
    let context_data = match context_path {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => json!({}),
    };

    let mut context = ExecutionContext::new(context_data);
    let mut engine = RuleEngine::new();
    let results = engine.execute_bundle(&bundle, &mut context);

    println!("Execution Results:");
    println!("  Bundle: {}", bundle.metadata.name);
    println!("  Execution ID: {}", results.execution_id);
    println!(
        "  Overall Result: {}",
        if results.overall_result { "✓ PASS" } else { "✗ FAIL" }
    );
    println!("  Rules Executed: {}", results.rules_executed);
    println!("  Rules Passed: {}", results.rules_passed);
    println!("  Rules Failed: {}", results.rules_failed);

    if verbose {
        println!("\nRule Details:");
        for rule_result in &results.rule_results {
            let status = if rule_result.result { "✓ PASS" } else { "✗ FAIL" };
            println!("  {status} {}: {}", rule_result.rule_name, rule_result.reason);
            if let Some(error) = &rule_result.error {
                println!("    Error: {error}");
            }
        }
    }

    if let Some(path) = output_path {
        std::fs::write(path, serde_json::to_string_pretty(&results)?)?;
        println!("\nResults saved to: {}", path.display());
    }

    Ok(())
}

fn parse_dsl(
    file: Option<&Path>,
    context_path: Option<&Path>,
    output_path: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let dsl_text = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let parser = DslParser::new();
    let ast = parser.parse(&dsl_text)?;

    println!("✓ DSL parsed successfully");
    if verbose {
        println!("  AST: {}", serde_json::to_string_pretty(&ast)?);
    }

    if let Some(path) = context_path {
        let context: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let result = DslEvaluator::new().evaluate(&ast, &context);

        println!("\nEvaluation Result:");
        println!(
            "  Result: {}",
            if result.result { "✓ PASS" } else { "✗ FAIL" }
        );
        println!("  Reason: {}", result.reason);
        if verbose {
            println!("  Details: {}", serde_json::to_string_pretty(&result.details)?);
        }
    }

    if let Some(path) = output_path {
        std::fs::write(path, serde_json::to_string_pretty(&ast)?)?;
        println!("\nAST saved to: {}", path.display());
    }

    Ok(())
}

fn create_bundle(output_path: Option<&Path>) -> Result<()> {
    let name = prompt("Bundle name: ")?;
    let description = prompt("Bundle description: ")?;
    let jurisdiction = prompt("Jurisdiction (e.g., GDPR, CCPA): ")?;
    let domain: Domain = prompt("Domain (finance/health/esg/general): ")?.parse()?;
    let author = prompt("Author: ")?;

    let mut builder = DecisionBundleBuilder::new()
        .name(name.clone())
        .description(description)
        .jurisdiction(jurisdiction)
        .domain(domain);
    if !author.is_empty() {
        builder = builder.author(author);
    }

    let tags = prompt("Tags (comma-separated): ")?;
    for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        builder = builder.tag(tag);
    }

    println!("\nAdd rules (leave ID empty to finish):");
    loop {
        let rule_id = prompt("Rule ID: ")?;
        if rule_id.is_empty() {
            break;
        }

        let rule_name = prompt("Rule name: ")?;
        let rule_description = prompt("Rule description: ")?;
        let rule_type = prompt("Rule type (dsl/expression/decision_table/decision_tree): ")?;

        let definition = match rule_type.as_str() {
            "dsl" => json!({ "dsl": prompt("DSL text: ")? }),
            "expression" => json!({ "expression": prompt("Expression: ")?, "variables": {} }),
            "decision_table" => {
                println!("Decision table (edit the JSON later for conditions/actions)");
                json!({ "table": { "conditions": [], "actions": [] } })
            }
            "decision_tree" => json!({ "tree": {} }),
            other => {
                return Err(glassbox::GlassBoxError::validation(format!(
                    "Invalid rule type: {other}"
                )))
            }
        };

        builder = builder.add_rule(Rule {
            id: rule_id,
            name: rule_name.clone(),
            rule_type,
            definition,
            description: Some(rule_description),
            severity: None,
            category: None,
        });
        println!("Added rule: {rule_name}");
    }

    let bundle = builder.build()?;
    let default_name = format!("{}_bundle.json", name.to_lowercase().replace(' ', "_"));
    let path = output_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(default_name));

    std::fs::write(&path, bundle.to_json()?)?;

    println!("\n✓ DecisionBundle created: {}", path.display());
    println!("  Bundle ID: {}", bundle.metadata.id);
    println!("  Rules: {}", bundle.rules.len());

    Ok(())
}

fn list_bundles(directory: &Path) -> Result<()> {
    let mut bundle_files: Vec<PathBuf> = std::fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().and_then(|ext| ext.to_str()) == Some("json")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.contains("bundle"))
        })
        .collect();
    bundle_files.sort();

    if bundle_files.is_empty() {
        println!("No DecisionBundle files found");
        return Ok(());
    }

    println!("Found {} DecisionBundle(s):", bundle_files.len());
    println!("{}", "-".repeat(80));

    for file in bundle_files {
        let name = file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("<unnamed>");
        println!("File: {name}");
        match DecisionBundle::from_file(&file) {
            Ok(bundle) => {
                println!("  Name: {}", bundle.metadata.name);
                println!("  Jurisdiction: {}", bundle.metadata.jurisdiction);
                println!("  Domain: {}", bundle.metadata.domain);
                println!("  Rules: {}", bundle.rules.len());
                println!("  Created: {}", bundle.metadata.created);
            }
            Err(err) => {
                println!("  Error: {err}");
            }
        }
        println!();
    }

    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
