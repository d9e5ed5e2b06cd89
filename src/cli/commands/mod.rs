use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("agora")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("AGORA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string, for example sqlite:agora.db?mode=rwc")
                .env("AGORA_DSN")
                .required(true),
        )
        .arg(
            Arg::new("external-url")
                .long("external-url")
                .help("Public base URL used to build third-party login callbacks")
                .default_value("http://localhost:8080")
                .env("AGORA_EXTERNAL_URL"),
        )
        .arg(
            Arg::new("session-idle-hours")
                .long("session-idle-hours")
                .help("Idle hours before a session expires on its sliding window")
                .default_value("24")
                .env("AGORA_SESSION_IDLE_HOURS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("admit-burst")
                .long("admit-burst")
                .help("Requests a user may burst before the admission bucket empties")
                .default_value("10")
                .env("AGORA_ADMIT_BURST")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("admit-refill-ms")
                .long("admit-refill-ms")
                .help("Milliseconds between admission bucket refills")
                .default_value("200")
                .env("AGORA_ADMIT_REFILL_MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("admit-block-hours")
                .long("admit-block-hours")
                .help("Hours a user stays blocked after exhausting the bucket")
                .default_value("3")
                .env("AGORA_ADMIT_BLOCK_HOURS")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("github-client-id")
                .long("github-client-id")
                .help("GitHub OAuth client id")
                .env("AGORA_GITHUB_CLIENT_ID"),
        )
        .arg(
            Arg::new("github-client-secret")
                .long("github-client-secret")
                .help("GitHub OAuth client secret")
                .env("AGORA_GITHUB_CLIENT_SECRET")
                .requires("github-client-id"),
        )
        .arg(
            Arg::new("google-client-id")
                .long("google-client-id")
                .help("Google OAuth client id")
                .env("AGORA_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new("google-client-secret")
                .long("google-client-secret")
                .help("Google OAuth client secret")
                .env("AGORA_GOOGLE_CLIENT_SECRET")
                .requires("google-client-id"),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("AGORA_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}

pub fn validator_log_level() -> clap::builder::ValueParser {
    clap::builder::ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}
