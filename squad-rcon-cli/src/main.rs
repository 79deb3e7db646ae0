mod shell;

use crate::shell::{Input, Shell};
use ansi_term::Colour::{Fixed, Green, Red, Yellow};
use clap::Parser;
use log::{error, info, LevelFilter};
use rpassword::read_password;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};
use squad_rcon_client::players::{parse_player_list, PlayerList, PlayerListError};
use squad_rcon_client::{connect, Client, Config, ErrorKind, DEFAULT_START_ID};
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

const DEFAULT_PORT: u16 = 21114;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address of the Squad server, e.g. `127.0.0.1:21114`.
    address: String,

    /// RCON password. Prompted for if not given.
    #[clap(short, long)]
    password: Option<String>,

    /// Run a single command, print the response and exit.
    #[clap(short, long)]
    command: Option<String>,

    /// First packet ID to use.
    #[clap(long, default_value_t = DEFAULT_START_ID)]
    start_id: i32,

    /// Connection timeout in milliseconds.
    #[clap(long, default_value_t = 5000)]
    dial_timeout_ms: u64,

    /// Write timeout in milliseconds.
    #[clap(long, default_value_t = 5000)]
    write_timeout_ms: u64,

    /// Time to wait for a response in milliseconds, 0 waits forever.
    #[clap(long, default_value_t = 30000)]
    response_timeout_ms: u64,

    /// Command sent after every command to detect the end of its response.
    #[clap(long)]
    confirmation_command: Option<String>,

    /// Read commands from stdin without line editing.
    #[clap(long)]
    no_interactive: bool,

    /// Log every packet.
    #[clap(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ! {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(err) = TermLogger::init(
        level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to set up logging: {}", err);
    }

    // Try to parse address with port, if that fails try to parse without and default to 21114.
    let socket_addr: SocketAddr = match args.address.parse() {
        Ok(addr) => addr,
        Err(_) => {
            let ip_addr: IpAddr = match args.address.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    eprintln!("Invalid address: {}", args.address);
                    proc_exit::Code::USAGE_ERR.process_exit();
                }
            };
            SocketAddr::new(ip_addr, DEFAULT_PORT)
        }
    };

    let mut config = Config {
        dial_timeout: Duration::from_millis(args.dial_timeout_ms),
        write_timeout: Duration::from_millis(args.write_timeout_ms),
        start_id: args.start_id,
        response_timeout: match args.response_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        },
        ..Config::default()
    };
    if let Some(confirmation_command) = &args.confirmation_command {
        config.confirmation_command = confirmation_command.clone();
    }

    let client = loop {
        let password = match &args.password {
            Some(password) => password.clone(),
            None => prompt_password(socket_addr),
        };

        // The server drops the connection on a wrong password, so every attempt reconnects.
        match connect(socket_addr, &password, config.clone()).await {
            Ok(client) => break client,
            Err(err) if err.kind() == ErrorKind::IncorrectPassword && args.password.is_none() => {
                println!("Invalid password.");
            }
            Err(err) if err.kind() == ErrorKind::IncorrectPassword => {
                error!("Invalid password.");
                proc_exit::Code::FAILURE.process_exit();
            }
            Err(err) => {
                error!("Connection failed: {}", err);
                proc_exit::Code::FAILURE.process_exit();
            }
        }
    };

    if let Some(command) = &args.command {
        let code = match client.execute(command).await {
            Ok(response) => {
                println!("{}", response);
                proc_exit::Code::SUCCESS
            }
            Err(err) => {
                error!("Command failed: {}", err);
                proc_exit::Code::FAILURE
            }
        };
        let _ = client.close().await;
        code.process_exit();
    }

    info!(
        "Connected. View builtins with `!help`. {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let prompt = Prompt { socket_addr };
    repl_loop(client, prompt, args.no_interactive).await
}

fn prompt_password(socket_addr: SocketAddr) -> String {
    print!("{}'s password: ", socket_addr);
    let _ = std::io::stdout().flush();
    match read_password() {
        Ok(password) => password,
        Err(err) => {
            eprintln!("Failed to read password: {}", err);
            proc_exit::Code::FAILURE.process_exit();
        }
    }
}

#[derive(Clone)]
struct Prompt {
    socket_addr: SocketAddr,
}

impl Display for Prompt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}> ", Fixed(10).paint(self.socket_addr.to_string()))
    }
}

async fn repl_loop(client: Client, prompt: Prompt, disable_interactive: bool) -> ! {
    let mut shell = Shell::new(prompt.to_string(), disable_interactive);

    loop {
        let line = match shell.next_line().await {
            Ok(Input::Line(line)) => line,
            Ok(Input::Eof) => {
                let _ = client.close().await;
                proc_exit::Code::SUCCESS.process_exit();
            }
            Ok(Input::Interrupted) => proc_exit::Code::SIGINT.process_exit(),
            Err(err) => {
                error!("Failed to read input: {}", err);
                proc_exit::Code::UNKNOWN.process_exit();
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let res = if let Some(builtin) = line.strip_prefix('!') {
            match builtin.trim() {
                "help" => {
                    print_help(&mut shell);
                    Ok(())
                }
                "players" => match client.execute("ListPlayers").await {
                    Ok(response) => {
                        print_players(&mut shell, &response);
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
                "quit" | "exit" => {
                    let code = match client.close().await {
                        Ok(()) => proc_exit::Code::SUCCESS,
                        Err(_) => proc_exit::Code::FAILURE,
                    };
                    code.process_exit();
                }
                _ => {
                    let _ = writeln!(shell.err(), "Unknown builtin.");
                    Ok(())
                }
            }
        } else {
            match client.execute(line).await {
                Ok(response) => {
                    let _ = writeln!(shell.out(), "{}", response);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        };

        if let Err(err) = res {
            let _ = writeln!(shell.err(), "An error occurred: {}", err);
            if err.is_fatal() {
                error!("Connection closed: {}", err);
                proc_exit::Code::FAILURE.process_exit();
            }
        }
    }
}

fn print_help(shell: &mut Shell) {
    let out = shell.out();
    let _ = writeln!(
        out,
        "{} {}",
        Green.paint(env!("CARGO_PKG_NAME")),
        env!("CARGO_PKG_VERSION")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", Yellow.paint("BUILTINS"));
    let _ = writeln!(out, "    !help                View this help listing");
    let _ = writeln!(out, "    !players             List active and recently disconnected players");
    let _ = writeln!(out, "    !quit                Close the connection and exit");
    let _ = writeln!(
        out,
        "    {}  Run a command on the server",
        Green.paint("<COMMAND> [ARGS...]")
    );
}

fn print_players(shell: &mut Shell, response: &str) {
    let list = match parse_player_list(response) {
        Ok(list) => list,
        Err(PlayerListError::InvalidLines { list, errors }) => {
            for err in errors {
                let _ = writeln!(shell.err(), "{}", Red.paint(err.to_string()));
            }
            list
        }
        Err(err) => {
            let _ = writeln!(shell.err(), "{}", err);
            PlayerList::default()
        }
    };

    let out = shell.out();
    let _ = writeln!(out, "{}", Yellow.paint("ACTIVE PLAYERS"));
    for player in &list.active_players {
        let squad = match player.squad_index {
            Some(squad) if player.is_squad_lead => format!("squad {} (lead)", squad),
            Some(squad) => format!("squad {}", squad),
            None => "no squad".to_string(),
        };
        let _ = writeln!(
            out,
            "    {:>3}  {}  team {}  {}  {}  {}",
            player.match_id,
            Green.paint(&player.name),
            player.team_index,
            squad,
            player.role,
            Fixed(8).paint(&player.steam_id)
        );
    }

    let _ = writeln!(out, "{}", Yellow.paint("RECENTLY DISCONNECTED"));
    for player in &list.disconnected_players {
        let since = player.since_disconnect.as_secs();
        let _ = writeln!(
            out,
            "    {:>3}  {}  {}m{:02}s ago  {}",
            player.match_id,
            player.name,
            since / 60,
            since % 60,
            Fixed(8).paint(&player.steam_id)
        );
    }
}
