use clap::{Parser, Subcommand};

/// Qianfan chat client
#[derive(Debug, Parser)]
#[command(name = "qianfan")]
#[command(version)]
#[command(about = "Chat with a Qianfan model", long_about = None)]
pub struct Args {
    /// Model name
    #[arg(short = 'm', long = "model", global = true)]
    pub model: Option<String>,

    /// Provider (default: config/provider or "qianfan")
    #[arg(long = "provider", global = true)]
    pub provider: Option<String>,

    /// Total attempts for non-streaming calls
    #[arg(long = "max-retries", global = true)]
    pub max_retries: Option<u32>,

    /// Give up on a call after this many seconds
    #[arg(long = "timeout-secs", global = true)]
    pub timeout_secs: Option<u64>,

    /// System prompt
    #[arg(short = 's', long = "system")]
    pub system: Option<String>,

    /// Stream the reply as it is generated
    #[arg(long = "stream")]
    pub stream: bool,

    /// Sampling temperature, 0 to 2
    #[arg(long = "temperature", default_value_t = 0.7)]
    pub temperature: f32,

    /// Nucleus sampling, above 0 up to 1
    #[arg(long = "top-p", default_value_t = 0.9)]
    pub top_p: f32,

    /// Extra request field as KEY=JSON (repeatable), e.g. max_output_tokens=256
    #[arg(short = 'o', long = "option", value_name = "KEY=JSON")]
    pub options: Vec<String>,

    /// Print the structured result as JSON
    #[arg(long = "json")]
    pub json: bool,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat on stdin; history lives only in memory
    Repl {
        /// System prompt opening the conversation
        #[arg(short = 's', long = "system")]
        system: Option<String>,
    },
}

/// Parse `KEY=JSON`; a value that is not JSON is taken as a string.
pub fn parse_option(raw: &str) -> anyhow::Result<(String, serde_json::Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        anyhow::bail!("option must look like KEY=VALUE: {raw}");
    };
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("option key is empty: {raw}");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
