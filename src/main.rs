use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use ktrace::job::{
    JobFilter, Target, TraceDefaults, TraceJobManager, TraceRequest, TraceSummary,
};
use ktrace::{ClusterConfig, KubeClient, LabelConfig};

#[derive(Parser)]
#[command(name = "kubectl-trace")]
#[command(about = "Execute and manage bpftrace programs on Kubernetes nodes", long_about = None)]
#[command(version)]
struct Cli {
    /// Namespace to work in (defaults to the cluster configuration's)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print Prometheus metrics to stderr before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bpftrace program on a node or in a pod's container
    Run {
        /// <node>, node/<node> or pod/<pod>
        target: String,

        /// File containing the program
        #[arg(short = 'f', long, conflicts_with = "eval")]
        filename: Option<PathBuf>,

        /// Program text given inline
        #[arg(short = 'e', long)]
        eval: Option<String>,

        /// Container to trace when the target is a pod
        #[arg(short, long)]
        container: Option<String>,

        /// Trace name (defaults to a generated one)
        #[arg(long)]
        name: Option<String>,

        #[arg(long = "serviceaccount")]
        service_account: Option<String>,

        /// Trace-runner image
        #[arg(long = "imagename", env = "KTRACE_IMAGE")]
        image: Option<String>,

        /// Header staging image, used with --fetch-headers
        #[arg(long = "init-imagename", env = "KTRACE_INIT_IMAGE")]
        init_image: Option<String>,

        /// Stage kernel headers instead of using the host's
        #[arg(long)]
        fetch_headers: bool,

        /// Seconds before the program is interrupted
        #[arg(long)]
        deadline: Option<i64>,

        /// Seconds the program gets to flush output after interruption
        #[arg(long)]
        deadline_grace_period: Option<i64>,
    },

    /// List traces
    Get {
        /// Trace name
        name: Option<String>,

        /// Trace id (takes precedence over the name)
        #[arg(long)]
        id: Option<String>,

        #[arg(short = 'A', long)]
        all_namespaces: bool,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Delete traces and their programs
    Delete {
        /// Trace name
        name: Option<String>,

        /// Trace id (takes precedence over the name)
        #[arg(long)]
        id: Option<String>,

        /// Delete every trace in scope
        #[arg(long)]
        all: bool,

        #[arg(short = 'A', long)]
        all_namespaces: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    ktrace::logging::init_logging(cli.verbose);
    let print_metrics = cli.metrics;

    let result = run(cli).await;

    if print_metrics {
        eprint!("{}", ktrace::metrics::render());
    }

    result
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClusterConfig::from_env()?;
    let namespace = cli
        .namespace
        .clone()
        .unwrap_or_else(|| config.namespace.clone());
    let client = KubeClient::new(&config)?;
    let labels = LabelConfig::default();

    match cli.command {
        Commands::Run {
            target,
            filename,
            eval,
            container,
            name,
            service_account,
            image,
            init_image,
            fetch_headers,
            deadline,
            deadline_grace_period,
        } => {
            let program = match (filename, eval) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .map_err(|e| format!("failed to read {}: {}", path.display(), e))?,
                (None, Some(text)) => text,
                (None, None) => return Err("a program is required: use -f or -e".into()),
            };

            let target: Target = target.parse()?;
            let placement = target
                .resolve(&client, &namespace, container.as_deref())
                .await?;

            let defaults = TraceDefaults::default();
            let id = Uuid::now_v7().to_string();
            let mut request = TraceRequest::new(
                id.clone(),
                namespace.clone(),
                placement.hostname,
                program,
                &labels,
                &defaults,
            );
            if let Some(name) = name {
                request.name = name;
            }
            request.pod = placement.pod;
            request.fetch_headers = fetch_headers;
            if let Some(sa) = service_account {
                request.service_account = sa;
            }
            if let Some(image) = image {
                request.image = image;
            }
            if let Some(init_image) = init_image {
                request.init_image = init_image;
            }
            if let Some(deadline) = deadline {
                request.deadline_seconds = deadline;
            }
            if let Some(grace) = deadline_grace_period {
                request.grace_period_seconds = grace;
            }

            let manager = TraceJobManager::new(client, labels, Some(namespace));
            manager.create(&request).await?;
            println!("trace {} created", id);
            Ok(())
        }
        Commands::Get {
            name,
            id,
            all_namespaces,
            output,
        } => {
            let scope = if all_namespaces { None } else { Some(namespace) };
            let manager = TraceJobManager::new(client, labels, scope);
            let traces = manager.get(&JobFilter { name, id }).await?;

            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&traces)?),
                OutputFormat::Table => print_table(&traces, Utc::now()),
            }
            Ok(())
        }
        Commands::Delete {
            name,
            id,
            all,
            all_namespaces,
        } => {
            if name.is_none() && id.is_none() && !all {
                return Err("specify a trace name, --id, or --all".into());
            }

            let scope = if all_namespaces { None } else { Some(namespace) };
            let manager = TraceJobManager::new(client, labels, scope);
            let mut stdout = std::io::stdout();
            manager.delete(&JobFilter { name, id }, &mut stdout).await?;
            Ok(())
        }
    }
}

fn print_table(traces: &[TraceSummary], now: DateTime<Utc>) {
    println!(
        "{:<16} {:<24} {:<50} {:<10} {}",
        "NAMESPACE", "NODE", "NAME", "STATUS", "AGE"
    );
    for trace in traces {
        let age = trace
            .start_time
            .map(|start| format_age(now - start))
            .unwrap_or_else(|| "<unknown>".to_string());
        println!(
            "{:<16} {:<24} {:<50} {:<10} {}",
            trace.namespace, trace.hostname, trace.name, trace.status, age
        );
    }
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86400),
    }
}
