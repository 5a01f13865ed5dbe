// Interactive BigFS shell: cp/get/ls/rm over the gateway.
use clap::{Arg, Command};
use std::io::{self, BufRead, Write};

use bigfs::client::BigFsClient;
use bigfs::config::load_config;
use bigfs::util::init_logging;

fn print_help() {
    println!("Commands:");
    println!("  cp <local> <bfs://path>    upload a local file");
    println!("  get <bfs://path> <local>   download a file");
    println!("  ls <bfs://path>            list files");
    println!("  rm <bfs://path>            remove a file (asks for confirmation)");
    println!("  quit                       leave the shell");
}

fn format_size(bytes: u64) -> String {
    let mib = bytes as f64 / (1024.0 * 1024.0);
    if mib >= 1.0 {
        format!("{:.2} MB", mib)
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}

/// Prompt on stdout and read one trimmed line from stdin.
fn prompt_line(prompt: &str) -> io::Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None); // EOF
    }
    Ok(Some(line.trim().to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let matches = Command::new("BigFSShell")
        .version("1.0")
        .about("Interactive shell for BigFS")
        .arg(
            Arg::new("gateway")
                .short('g')
                .long("gateway")
                .value_name("ADDR")
                .help("Overrides the gateway address from config"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value("config.toml")
                .help("Path to the configuration file"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").expect("has default");
    let mut config = load_config(config_path)?;
    if let Some(gateway) = matches.get_one::<String>("gateway") {
        config.common.gateway_addr = gateway.clone();
    }

    let _guard = init_logging(&config.common, &config.client.log_path);

    let mut client = match BigFsClient::connect(config.common.clone()).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!(
                "Fatal: could not connect to gateway at {}: {}",
                config.common.gateway_addr, e
            );
            std::process::exit(1);
        }
    };

    println!("Welcome to the BigFS shell. Type 'help' to list commands.");
    loop {
        let line = match prompt_line("bigfs > ")? {
            Some(line) => line,
            None => {
                println!();
                break;
            }
        };

        let args: Vec<&str> = line.split_whitespace().collect();
        match args.as_slice() {
            [] => continue,
            ["cp", local, remote] => match client.copy_to(local, remote).await {
                Ok(()) => println!("Upload of '{}' complete.", remote),
                Err(e) => eprintln!("Upload failed: {}", e),
            },
            ["get", remote, local] => match client.fetch_to(remote, local).await {
                Ok(()) => println!("File '{}' saved as '{}'.", remote, local),
                Err(e) => eprintln!("Download failed: {}", e),
            },
            ["ls"] | ["ls", _] => {
                let path = if args.len() == 2 { args[1] } else { "" };
                match client.list(path).await {
                    Ok(files) if files.is_empty() => println!("No files found."),
                    Ok(files) => {
                        println!("{:<40} {}", "Name", "Size (approx)");
                        println!("{:<40} {}", "----", "-------------");
                        for info in files {
                            println!("{:<40} {}", info.filename, format_size(info.size));
                        }
                    }
                    Err(e) => eprintln!("List failed: {}", e),
                }
            }
            ["rm", remote] => {
                let confirm =
                    prompt_line(&format!("Remove '{}'? This cannot be undone (y/N): ", remote))?;
                match confirm.as_deref() {
                    Some("y") | Some("Y") | Some("yes") => match client.remove(remote).await {
                        Ok(response) if response.success => {
                            println!("Removed '{}'. {}", remote, response.message)
                        }
                        Ok(response) => eprintln!("Remove failed: {}", response.message),
                        Err(e) => eprintln!("Remove failed: {}", e),
                    },
                    _ => println!("Cancelled."),
                }
            }
            ["quit"] | ["exit"] => break,
            ["help"] | ["?"] => print_help(),
            _ => println!("Unknown command. Type 'help' to list commands."),
        }
    }

    println!("Bye!");
    Ok(())
}
