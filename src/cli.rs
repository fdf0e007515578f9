//! Command-line argument parsing for punchclock

/// Parse command line arguments
pub struct Args {
    pub once: bool,
    pub validate: bool,
    pub help: bool,
}

pub fn parse_args() -> Args {
    parse_from(std::env::args().skip(1))
}

fn parse_from(args: impl Iterator<Item = String>) -> Args {
    let mut result = Args {
        once: false,
        validate: false,
        help: false,
    };

    for arg in args {
        match arg.as_str() {
            "--once" => result.once = true,
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            _ => {}
        }
    }

    result
}

pub fn print_help() {
    println!("punchclock - attendance portal automation\n");
    println!("USAGE:");
    println!("    punchclock [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --once              Punch in immediately, skipping the window, then exit");
    println!("    --validate          Validate configuration and exit");
    println!("    --help, -h          Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    See .env.example for required configuration variables");
}
