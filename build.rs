// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn names_arg(required: bool) -> Arg {
    Arg::new("names")
        .num_args(1..)
        .required(required)
        .help("Recipe names")
}

fn flag(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .action(ArgAction::SetTrue)
        .help(help)
}

fn repeated(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("NAME")
        .action(ArgAction::Append)
        .help(help)
}

fn build_cli() -> Command {
    Command::new("keg")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Keg Contributors")
        .about("Dependency-aware build and install orchestrator for package recipes")
        .arg(Arg::new("config").long("config").value_name("PATH").help("Config file"))
        .arg(Arg::new("prefix").long("prefix").value_name("PATH").help("Install prefix"))
        .arg(Arg::new("catalog").long("catalog").value_name("PATH").help("Recipe directory"))
        .arg(Arg::new("cache").long("cache").value_name("PATH").help("Download cache directory"))
        .arg(flag("quiet", "Plain log output instead of progress bars").short('q'))
        .subcommand_required(true)
        .subcommand(
            Command::new("install")
                .about("Install recipes and their dependencies")
                .arg(names_arg(true))
                .arg(flag("build-from-source", "Build from source even when a bottle is available").short('s'))
                .arg(flag("test", "Run each requested recipe's test procedure after installing"))
                .arg(repeated("with", "Enable a build option or optional dependency"))
                .arg(repeated("without", "Leave out a recommended dependency"))
                .arg(Arg::new("jobs").short('j').long("jobs").value_name("N").help("Recipes processed in parallel"))
                .arg(flag("dry-run", "Show the plan without installing anything"))
                .arg(Arg::new("timeout").long("timeout").value_name("SECS").help("Cancel the run after this many seconds")),
        )
        .subcommand(
            Command::new("test")
                .about("Run the test procedure of an installed recipe")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("livecheck")
                .about("Check upstream for newer versions")
                .arg(names_arg(false))
                .arg(flag("json", "Print results as JSON")),
        )
        .subcommand(
            Command::new("fetch")
                .about("Download and verify resources without building")
                .arg(names_arg(true))
                .arg(flag("build-from-source", "Fetch source resources even when a bottle is available").short('s')),
        )
        .subcommand(
            Command::new("deps")
                .about("Print the resolution plan")
                .arg(names_arg(true))
                .arg(flag("include-test", "Include test dependencies of the named recipes"))
                .arg(repeated("with", "Enable an optional dependency"))
                .arg(repeated("without", "Leave out a recommended dependency"))
                .arg(flag("json", "Print the plan as JSON")),
        )
        .subcommand(
            Command::new("list")
                .about("List installed recipes")
                .arg(flag("requested", "Only recipes installed on request")),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Remove an installed recipe")
                .arg(Arg::new("name").required(true))
                .arg(flag("ignore-dependents", "Remove even if other installed recipes depend on it")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("keg.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
        return;
    }

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
