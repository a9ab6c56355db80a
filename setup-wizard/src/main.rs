use std::path::Path;

const USAGE: &str = "\
Usage:
  setup-wizard --answers <file>        run every step unattended and install
  setup-wizard --check-tools [<file>]  probe the document-conversion tools
  setup-wizard --test-db               probe the stored database connection";

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .filter(|v| !v.starts_with("--"))
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return;
    }

    // Unattended install driven by a TOML answers file.
    if args.iter().any(|a| a == "--answers") {
        let code = match flag_value(&args, "--answers") {
            Some(path) => setup_wizard::run_unattended(Path::new(path)),
            None => {
                eprintln!("--answers needs a file\n\n{}", USAGE);
                setup_wizard::EXIT_USAGE
            }
        };
        std::process::exit(code);
    }

    if args.iter().any(|a| a == "--check-tools") {
        let answers = flag_value(&args, "--check-tools").map(Path::new);
        std::process::exit(setup_wizard::run_check_tools(answers));
    }

    if args.iter().any(|a| a == "--test-db") {
        std::process::exit(setup_wizard::run_test_db());
    }

    eprintln!("{}", USAGE);
    std::process::exit(setup_wizard::EXIT_USAGE);
}
