use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use log::debug;

use converge_core::CancellationToken;
use converge_core::arn::{Arn, dns_suffix};
use converge_core::hosted_zone::{HostedZoneKind, HostedZoneTable};
use converge_core::rule::RuleKind;
use converge_provider_aws::{
    CloudControl, ProviderConfig, RequestProgress, SecurityGroupRule, SecurityGroupRules,
};

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "Drive cloud resources to their target state", long_about = None)]
struct Cli {
    /// AWS region (overrides the config file)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Path to a JSON provider config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a Cloud Control request to finish
    WaitRequest {
        /// Request token returned by a create/update/delete call
        token: String,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 1200)]
        timeout: u64,
    },
    /// Read a resource through Cloud Control
    Get {
        #[command(flatten)]
        target: ResourceArgs,
    },
    /// Delete a resource and wait until it is gone
    Delete {
        #[command(flatten)]
        target: ResourceArgs,
    },
    /// Create a resource and wait until it is ready
    Create {
        /// CloudFormation resource type (e.g., AWS::Logs::LogGroup)
        #[arg(long)]
        type_name: String,

        /// Desired state as a JSON object
        #[arg(long)]
        desired_state: String,
    },
    /// Security group rule commands
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Look up the Route 53 hosted zone ID of a regional endpoint
    ///
    /// Without a region, every known region and its zone ID is listed.
    HostedZone {
        region: Option<String>,

        #[arg(long, default_value = "elb")]
        kind: HostedZoneKind,
    },
    /// Parse an ARN and print its fields
    Arn { arn: String },
    /// Build an ARN, picking the partition from the region
    BuildArn {
        #[arg(long)]
        service: String,

        #[arg(long, default_value = "")]
        region: String,

        #[arg(long, default_value = "")]
        account_id: String,

        #[arg(long)]
        resource: String,
    },
}

#[derive(Args)]
struct ResourceArgs {
    /// CloudFormation resource type (e.g., AWS::EC2::VPC)
    #[arg(long)]
    type_name: String,

    /// Primary identifier of the resource
    #[arg(long)]
    identifier: String,
}

#[derive(Subcommand)]
enum RuleCommands {
    /// Add a rule and wait until it is visible
    Authorize(RuleArgs),
    /// Remove a rule and wait until it is gone
    Revoke(RuleArgs),
    /// Print the ID of a matching rule
    Find(RuleArgs),
}

#[derive(Args)]
struct RuleArgs {
    #[arg(long)]
    group_id: String,

    /// ingress or egress
    #[arg(long)]
    kind: RuleKind,

    /// tcp, udp, icmp, or all
    #[arg(long, default_value = "tcp")]
    protocol: String,

    #[arg(long)]
    from_port: Option<i32>,

    #[arg(long)]
    to_port: Option<i32>,

    #[arg(long)]
    cidr: String,

    #[arg(long)]
    description: Option<String>,
}

impl From<RuleArgs> for SecurityGroupRule {
    fn from(args: RuleArgs) -> Self {
        SecurityGroupRule {
            group_id: args.group_id,
            kind: args.kind,
            protocol: args.protocol,
            from_port: args.from_port,
            to_port: args.to_port.or(args.from_port),
            cidr: args.cidr,
            description: args.description,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let result = match load_config(cli.config.as_deref(), cli.region.as_deref()) {
        Ok(config) => run(cli.command, config, cancel).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// RUST_LOG wins over -v
fn init_logger(verbose: u8) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level(verbose)))
        .format_timestamp_millis()
        .init();
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("{}", "Interrupted, cancelling...".yellow());
        cancel.cancel();
    }
}

fn load_config(path: Option<&Path>, region: Option<&str>) -> Result<ProviderConfig, String> {
    let config = match path {
        Some(path) => ProviderConfig::load(path).map_err(|e| e.to_string())?,
        None => ProviderConfig::default(),
    };
    let config = match region {
        Some(region) => config.with_region(region),
        None => config,
    };
    debug!("Provider config: {:?}", config);
    Ok(config)
}

async fn run(
    command: Commands,
    config: ProviderConfig,
    cancel: CancellationToken,
) -> Result<(), String> {
    match command {
        Commands::WaitRequest { token, timeout } => {
            let client = CloudControl::new(config).await.with_cancellation(cancel);
            run_wait_request(&client, &token, Duration::from_secs(timeout)).await
        }
        Commands::Get { target } => {
            let client = CloudControl::new(config).await.with_cancellation(cancel);
            run_get(&client, &target).await
        }
        Commands::Delete { target } => {
            let client = CloudControl::new(config).await.with_cancellation(cancel);
            run_delete(&client, &target).await
        }
        Commands::Create {
            type_name,
            desired_state,
        } => {
            let client = CloudControl::new(config).await.with_cancellation(cancel);
            run_create(&client, &type_name, &desired_state).await
        }
        Commands::Rule { command } => {
            let rules = SecurityGroupRules::new(config)
                .await
                .with_cancellation(cancel);
            run_rule_command(&rules, command).await
        }
        Commands::HostedZone {
            region: Some(region),
            kind,
        } => run_hosted_zone(&region, kind),
        Commands::HostedZone { region: None, kind } => {
            for (region, zone_id) in hosted_zone_listing(kind) {
                println!("{}\t{}", region, zone_id);
            }
            Ok(())
        }
        Commands::Arn { arn } => run_arn(&arn),
        Commands::BuildArn {
            service,
            region,
            account_id,
            resource,
        } => {
            let region = if region.is_empty() {
                region
            } else {
                converge_provider_aws::normalize_region(&region)
            };
            println!("{}", Arn::build(service, region, account_id, resource));
            Ok(())
        }
    }
}

fn print_progress(progress: &RequestProgress) -> Result<(), String> {
    let json = serde_json::to_string_pretty(progress).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

async fn run_wait_request(
    client: &CloudControl,
    token: &str,
    timeout: Duration,
) -> Result<(), String> {
    println!("{} {}", "Waiting for request".cyan(), token);
    let progress = client
        .wait_for_request(token, timeout)
        .await
        .map_err(|e| e.to_string())?;
    println!("  {} {}", "✓".green(), progress.status);
    print_progress(&progress)
}

async fn run_get(client: &CloudControl, target: &ResourceArgs) -> Result<(), String> {
    let properties = client
        .get(&target.type_name, &target.identifier)
        .await
        .map_err(|e| e.to_string())?;

    match properties {
        Some(properties) => {
            let json = serde_json::to_string_pretty(&properties).map_err(|e| e.to_string())?;
            println!("{}", json);
            Ok(())
        }
        None => Err(format!(
            "{} {} not found",
            target.type_name, target.identifier
        )),
    }
}

async fn run_delete(client: &CloudControl, target: &ResourceArgs) -> Result<(), String> {
    println!(
        "{} {} {}",
        "Deleting".red().bold(),
        target.type_name,
        target.identifier
    );
    client
        .delete(&target.type_name, &target.identifier)
        .await
        .map_err(|e| e.to_string())?;
    println!("  {} deleted", "✓".green());
    Ok(())
}

fn parse_desired_state(desired_state: &str) -> Result<serde_json::Value, String> {
    let value: serde_json::Value = serde_json::from_str(desired_state)
        .map_err(|e| format!("Invalid --desired-state JSON: {}", e))?;
    if !value.is_object() {
        return Err("--desired-state must be a JSON object".to_string());
    }
    Ok(value)
}

async fn run_create(
    client: &CloudControl,
    type_name: &str,
    desired_state: &str,
) -> Result<(), String> {
    let desired_state = parse_desired_state(desired_state)?;
    println!("{} {}", "Creating".green().bold(), type_name);
    let progress = client
        .create(type_name, &desired_state)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "  {} {}",
        "✓".green(),
        progress.identifier.as_deref().unwrap_or("(no identifier)")
    );
    print_progress(&progress)
}

async fn run_rule_command(
    rules: &SecurityGroupRules,
    command: RuleCommands,
) -> Result<(), String> {
    match command {
        RuleCommands::Authorize(args) => {
            let rule = SecurityGroupRule::from(args);
            let rule_id = rules.authorize(&rule).await.map_err(|e| e.to_string())?;
            println!("  {} {} ({})", "✓".green(), rule, rule_id);
        }
        RuleCommands::Revoke(args) => {
            let rule = SecurityGroupRule::from(args);
            rules.revoke(&rule).await.map_err(|e| e.to_string())?;
            println!("  {} revoked {}", "✓".green(), rule);
        }
        RuleCommands::Find(args) => {
            let rule = SecurityGroupRule::from(args);
            match rules.find(&rule).await.map_err(|e| e.to_string())? {
                Some(rule_id) => println!("{}", rule_id),
                None => return Err(format!("No rule matches {}", rule)),
            }
        }
    }
    Ok(())
}

fn run_hosted_zone(region: &str, kind: HostedZoneKind) -> Result<(), String> {
    let region = converge_provider_aws::normalize_region(region);
    let table = HostedZoneTable::for_kind(kind);
    match table.lookup(&region) {
        Some(zone_id) => {
            println!("{}", zone_id);
            Ok(())
        }
        None => Err(format!("No {} hosted zone known for region {}", kind, region)),
    }
}

fn hosted_zone_listing(kind: HostedZoneKind) -> Vec<(String, String)> {
    let table = HostedZoneTable::for_kind(kind);
    table
        .regions()
        .filter_map(|region| {
            table
                .lookup(region)
                .map(|zone_id| (region.to_string(), zone_id.to_string()))
        })
        .collect()
}

fn arn_fields(arn: &Arn) -> Vec<(&'static str, String)> {
    let (resource_type, resource_id) = arn.resource_parts();
    let mut fields = vec![
        ("partition", arn.partition.clone()),
        ("dns suffix", dns_suffix(&arn.partition).to_string()),
        ("service", arn.service.clone()),
        ("region", arn.region.clone()),
        ("account", arn.account_id.clone()),
        ("resource", arn.resource.clone()),
    ];
    if let Some(resource_type) = resource_type {
        fields.push(("resource type", resource_type.to_string()));
    }
    fields.push(("resource id", resource_id.to_string()));
    fields
}

fn run_arn(arn: &str) -> Result<(), String> {
    let arn: Arn = arn.parse().map_err(|e| format!("{}", e))?;
    for (name, value) in arn_fields(&arn) {
        println!("{}: {}", name.bold(), value);
    }
    Ok(())
}
