//! Command-line argument parsing for cafeboard

/// Parsed command line
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub once: bool,
    pub validate: bool,
    pub help: bool,
    pub export: Option<String>,
    pub import: Option<String>,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse from an explicit argv (first element is the program name).
/// Unknown flags are ignored; a file flag without a value is left unset.
pub fn parse_args_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" => result.once = true,
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            "--export" => {
                if i + 1 < args.len() {
                    i += 1;
                    result.export = Some(args[i].clone());
                }
            }
            "--import" => {
                if i + 1 < args.len() {
                    i += 1;
                    result.import = Some(args[i].clone());
                }
            }
            _ => {}
        }
        i += 1;
    }

    result
}

pub fn print_help() {
    println!("Cafeboard - Cafe open/closed status board\n");
    println!("USAGE:");
    println!("    cafeboard [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once              Print the current board as JSON and exit");
    println!("    --validate          Validate configuration and exit");
    println!("    --export FILE       Write a backup of the shop record to FILE and exit");
    println!("    --import FILE       Restore the shop record from a backup FILE and exit");
    println!("    --help, -h          Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    ADMIN_PASSWORD      Admin password for first run (required, min 6 chars)");
    println!("    SHOP_NAME           Shop name for first run (default: Tea Cafe)");
    println!("    BIND_ADDR, PORT     HTTP listener (default: 0.0.0.0:8080)");
    println!("    DATA_FILE           Shop record location (default: ./data/shop.json)");
    println!("    MAX_BODY_BYTES      Largest accepted request body (default: 65536)");
    println!("    RUST_LOG            Log filter (default: cafeboard=info)");
}
