//! Snippet Sandbox CLI
//!
//! Single-shot mode:
//!   snippet-sandbox <snippet-file> [--modules table.json] [--markdown] [--local-dir dir]
//!
//! Server mode (persistent process, reads from stdin):
//!   snippet-sandbox --server [--modules table.json]
//!
//! Protocol (server mode):
//!   Request (stdin), one share payload per line:
//!     Y29uc29sZS5sb2coMSk%3D
//!
//!   Response (stdout):
//!     Status:Ok
//!     Length:1234
//!
//!     <div class="console-log">...</div>
//!
//!   Error response:
//!     Status:Error
//!     Length:42
//!
//!     Invalid share payload: invalid base64...

use anyhow::{anyhow, Result};
use snippet_sandbox::{
    decode_share, extract_code, load_module_table, Sandbox, SandboxConfig, SnippetKind,
    TypeDeclarations,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn print_usage() {
    eprintln!("Snippet Sandbox - Isolated runtime for documentation snippets");
    eprintln!();
    eprintln!("Single-shot mode:");
    eprintln!("  snippet-sandbox <snippet-file> [--modules table.json] [--markdown] [--local-dir dir]");
    eprintln!();
    eprintln!("Server mode (persistent process):");
    eprintln!("  snippet-sandbox --server [--modules table.json]");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  snippet-sandbox ./intro.ts");
    eprintln!("  snippet-sandbox ./README.md --markdown");
    eprintln!("  snippet-sandbox --server --modules ./modules.json");
}

#[derive(Debug, Default)]
struct Options {
    server: bool,
    snippet: Option<PathBuf>,
    modules: Option<PathBuf>,
    local_dir: Option<PathBuf>,
    markdown: bool,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--server" => options.server = true,
            "--markdown" => options.markdown = true,
            "--modules" => {
                let path = iter.next().ok_or_else(|| anyhow!("--modules requires a file"))?;
                options.modules = Some(PathBuf::from(path));
            }
            "--local-dir" => {
                let path = iter.next().ok_or_else(|| anyhow!("--local-dir requires a directory"))?;
                options.local_dir = Some(PathBuf::from(path));
            }
            flag if flag.starts_with("--") => return Err(anyhow!("Unknown option: {}", flag)),
            path if options.snippet.is_none() => options.snippet = Some(PathBuf::from(path)),
            extra => return Err(anyhow!("Unexpected argument: {}", extra)),
        }
    }

    Ok(options)
}

/// Create the sandbox and load every registered module into it.
async fn prepare(options: &Options) -> Result<Sandbox> {
    let mut config = SandboxConfig {
        local_modules_dir: options.local_dir.clone(),
        ..Default::default()
    };
    if let Some(path) = &options.modules {
        config.modules = load_module_table(path)?;
    }

    let mut sandbox = Sandbox::new(config)?;
    let fetcher = sandbox.http_fetcher()?;
    let mut types = TypeDeclarations::default();
    let report = sandbox.load_all(&fetcher, &mut types).await;

    for entry in &report.entries {
        tracing::debug!(
            module = %entry.module,
            library = ?entry.library,
            types = ?entry.types,
            "module status"
        );
    }

    Ok(sandbox)
}

/// Run in single-shot mode
async fn run_single_shot(options: &Options) -> Result<()> {
    let path = options
        .snippet
        .as_ref()
        .ok_or_else(|| anyhow!("Missing snippet file"))?;
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))?;
    let typed = options.markdown || path.extension().is_some_and(|ext| ext == "ts");
    let source = if options.markdown {
        extract_code(&raw)
    } else {
        raw.as_str()
    };

    let mut sandbox = prepare(options).await?;
    let outcome = if typed {
        sandbox.run_typescript(source).await?
    } else {
        sandbox.run_snippet(source, SnippetKind::detect(source)).await?
    };
    sandbox.settle_output().await;

    // Print rendered output to stdout
    println!("{}", sandbox.render_output());

    if let Some(error) = outcome.error {
        return Err(anyhow!("Snippet failed: {}", error));
    }
    Ok(())
}

/// Run in server mode (persistent process, reads requests from stdin)
async fn run_server(options: &Options) -> Result<()> {
    // Create the sandbox ONCE at startup (V8 cold start and module fetches happen here)
    let mut sandbox = prepare(options).await?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut reader = stdin.lock();

    tracing::info!("server ready, reading from stdin");

    loop {
        let mut payload_line = String::new();

        let bytes_read = reader.read_line(&mut payload_line)?;
        if bytes_read == 0 {
            // EOF - stdin closed, exit gracefully
            break;
        }
        if payload_line.trim().is_empty() {
            continue;
        }

        let source = match decode_share(&payload_line) {
            Ok(source) => source,
            Err(e) => {
                write_response(&mut stdout, false, &e.to_string())?;
                continue;
            }
        };

        // Each request starts from a blank output surface
        sandbox.clear_output();
        // Share links always carry TypeScript
        match sandbox.run_typescript(&source).await {
            Ok(_) => {
                sandbox.settle_output().await;
                write_response(&mut stdout, true, &sandbox.render_output())?;
            }
            Err(e) => {
                write_response(&mut stdout, false, &e.to_string())?;
            }
        }
    }

    tracing::info!("server shutting down");
    Ok(())
}

/// Write response in length-prefixed protocol
fn write_response(stdout: &mut std::io::Stdout, ok: bool, body: &str) -> Result<()> {
    let status = if ok { "Ok" } else { "Error" };
    let length = body.len();

    writeln!(stdout, "Status:{}", status)?;
    writeln!(stdout, "Length:{}", length)?;
    writeln!(stdout)?; // Empty line separator
    write!(stdout, "{}", body)?;
    stdout.flush()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "snippet_sandbox=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        print_usage();
        return Err(anyhow!("Missing required arguments"));
    }

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(e) => {
            print_usage();
            return Err(e);
        }
    };

    if options.server {
        return run_server(&options).await;
    }

    if options.snippet.is_none() {
        print_usage();
        return Err(anyhow!("Missing required arguments"));
    }

    run_single_shot(&options).await
}
