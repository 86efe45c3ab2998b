use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Port messaging over POSIX message queues
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// Registry root shared by every peer on this host
    #[clap(long, default_value = crate::defaults::REGISTRY_ROOT)]
    pub registry_root: PathBuf,

    /// Identity override (defaults to this process id)
    #[clap(long)]
    pub identity: Option<u32>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,

    /// Colorize log output by level
    #[clap(long, default_value_t = false)]
    pub color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Subscribe to a port and print every delivery until interrupted
    Listen { port: String },

    /// Deliver one fire-and-forget message
    Send {
        port: String,
        payload: String,
        /// Queue priority for the message
        #[clap(short, long, default_value_t = 0)]
        priority: u32,
        /// Fan out to every registered receiver instead of exactly one
        #[clap(long, default_value_t = false)]
        multicast: bool,
    },

    /// Send a request and wait for the reply
    Request {
        port: String,
        payload: String,
        #[clap(short, long, default_value_t = 0)]
        priority: u32,
        /// Give up after this long (e.g. "500ms", "10s", "2m"); default waits forever
        #[clap(short, long, value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Serve one blocking request and answer it
    Respond {
        port: String,
        /// Payload to reply with
        reply: String,
    },
}

/// Parse a human-readable duration: bare seconds, or "ms"/"s"/"m" suffixed.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_owned());
    }
    let (number, unit) = match s {
        _ if s.ends_with("ms") => (&s[..s.len() - 2], "ms"),
        _ if s.ends_with('s') => (&s[..s.len() - 1], "s"),
        _ if s.ends_with('m') => (&s[..s.len() - 1], "m"),
        _ => (s, "s"),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid number in duration: {}", number))?;
    Ok(match unit {
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value * 60),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_each_unit() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("ms").is_err());
    }
}
