use chord_dht::{ChordDht, Client, ClientError};
use std::{env, net::SocketAddr, process, str::FromStr, time::Duration};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

const USAGE: &str = "usage: node <BIND_ADDR> [BOOTSTRAP_ADDR] [--bits <M>] [--timeout <SECS>]";

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let args = match Args::parse(env::args().skip(1)) {
        Some(args) => args,
        None => {
            eprintln!("{}", USAGE);
            process::exit(2);
        }
    };

    let mut builder = ChordDht::builder()
        .set_bits(args.bits)
        .set_timeout(args.timeout);

    if let Some(bootstrap) = args.bootstrap {
        builder = builder.set_bootstrap(bootstrap);
    }

    let dht = match builder.bind(args.bind).await {
        Ok(dht) => dht,
        Err(error) => {
            eprintln!("failed to start node: {}", error);
            process::exit(1);
        }
    };

    println!("node {} started", dht.node());

    let mut client = Client::bind(SocketAddr::new(args.bind.ip(), 0)).await.unwrap();

    let mut stdout = io::stdout();
    let mut stdin = BufReader::new(io::stdin());
    let mut line = String::new();

    loop {
        stdout.write_all(b"> ").await.unwrap();
        stdout.flush().await.unwrap();

        line.clear();

        if stdin.read_line(&mut line).await.unwrap() > 0 {
            if !handle_command(&dht, &mut client, &line).await {
                break;
            }
        } else {
            break;
        }
    }

    dht.shutdown();
}

async fn handle_command(dht: &ChordDht, client: &mut Client, command: &str) -> bool {
    let via = dht.node().addr;

    match command.parse() {
        Ok(Command::Help) => {
            println!("    h               shows this help message");
            println!("    p <KEY> <VALUE> store a value");
            println!("    g <KEY>         look up a value");
            println!("    s               print the ring state of this node");
            println!("    q               quit");
        }
        Ok(Command::Put { key, value }) => match client.put(via, &key, value).await {
            Ok(reply) => println!("stored at {} after {} hops", reply.owner, reply.hops),
            Err(ClientError::Rejected { reason, owner }) => {
                println!("rejected by {}: {:?}", owner, reason)
            }
            Err(error) => println!("put failed: {}", error),
        },
        Ok(Command::Get { key }) => match client.get(via, &key).await {
            Ok(reply) => match reply.value {
                Some(value) => println!(
                    "{:?} (from {} after {} hops)",
                    String::from_utf8_lossy(&value),
                    reply.owner,
                    reply.hops
                ),
                None => println!("not found (owner {})", reply.owner),
            },
            Err(error) => println!("get failed: {}", error),
        },
        Ok(Command::State) => match dht.state().await {
            Some(state) => println!("{}", state),
            None => {
                println!("node has shut down");
                return false;
            }
        },
        Ok(Command::Quit) => return false,
        Err(_) => println!("invalid command (use 'h' for help)"),
    }

    true
}

enum Command {
    Help,
    Put { key: String, value: String },
    Get { key: String },
    State,
    Quit,
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();

        match words.next().ok_or(ParseError)? {
            "h" | "?" => Ok(Self::Help),
            "p" => {
                let key = words.next().ok_or(ParseError)?.to_owned();
                let value = words.collect::<Vec<_>>().join(" ");
                if value.is_empty() {
                    return Err(ParseError);
                }
                Ok(Self::Put { key, value })
            }
            "g" => Ok(Self::Get {
                key: words.next().ok_or(ParseError)?.to_owned(),
            }),
            "s" => Ok(Self::State),
            "q" => Ok(Self::Quit),
            _ => Err(ParseError),
        }
    }
}

struct ParseError;

struct Args {
    bind: SocketAddr,
    bootstrap: Option<String>,
    bits: u8,
    timeout: Duration,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Option<Self> {
        let mut positional = Vec::new();
        let mut bits = chord_dht::DEFAULT_BITS;
        let mut timeout = chord_dht::DEFAULT_TIMEOUT;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--bits" => bits = args.next()?.parse().ok()?,
                "--timeout" => timeout = Duration::from_secs_f64(args.next()?.parse().ok()?),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let bind = positional.next()?.parse().ok()?;
        let bootstrap = positional.next();

        if positional.next().is_some() {
            return None;
        }

        Some(Self {
            bind,
            bootstrap,
            bits,
            timeout,
        })
    }
}
