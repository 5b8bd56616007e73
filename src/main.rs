use argh::FromArgs;
use flowsh::{Interpreter, Limits};

#[derive(FromArgs)]
/// A small shell with pipes, redirections and conditional chains.
struct Args {
    /// run this line and exit with its status instead of reading input
    #[argh(option, short = 'c')]
    command: Option<String>,

    /// prompt shown before each line
    #[argh(option, default = "String::from(\"$ \")")]
    prompt: String,

    /// maximum number of commands in one line
    #[argh(option)]
    max_commands: Option<usize>,
}

fn main() {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut limits = Limits::default();
    if let Some(max) = args.max_commands {
        limits.max_commands = max;
    }
    let mut sh = Interpreter::with_limits(limits);

    let code = match args.command {
        Some(line) => match sh.run_line(&line) {
            Ok(status) => sh.exit_code().unwrap_or(status),
            Err(e) => {
                eprintln!("flowsh: {e:#}");
                2
            }
        },
        None => match sh.repl(&args.prompt) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("flowsh: {e}");
                1
            }
        },
    };
    std::process::exit(code);
}
