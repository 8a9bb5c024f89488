use crate::cli;
use anyhow::Context;
use qianfan_chat::config::Config;
use qianfan_chat::{Cancellation, ChatClient, ChatOutput, GenerationParams, Message, Prompt};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;

/// Apply command-line overrides on top of file and environment settings.
pub fn build_client(http: &reqwest::Client, cfg: &Config, args: &cli::Args) -> anyhow::Result<ChatClient> {
    let mut cfg = cfg.clone();
    if let Some(provider) = &args.provider {
        cfg.provider = Some(provider.clone());
    }
    if let Some(model) = &args.model {
        cfg.model = Some(model.clone());
    }
    if let Some(n) = args.max_retries {
        cfg.max_retries = Some(n);
    }

    let client = ChatClient::from_config(http.clone(), &cfg).context("failed to build chat client")?;
    tracing::debug!(provider = client.provider_name(), settings = ?client.settings(), "built client");
    Ok(client)
}

fn cancellation(args: &cli::Args) -> Cancellation {
    match args.timeout_secs {
        Some(s) => Cancellation::none().with_timeout(Duration::from_secs(s)),
        None => Cancellation::none(),
    }
}

pub async fn cmd_chat(client: &ChatClient, args: &cli::Args) -> anyhow::Result<()> {
    let user = args.prompt.join(" ");
    if user.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: qianfan \"Hello\" or `qianfan repl`");
    }

    let mut params = GenerationParams {
        temperature: args.temperature,
        top_p: args.top_p,
        stream: args.stream,
        ..Default::default()
    };
    for raw in &args.options {
        let (k, v) = cli::parse_option(raw)?;
        params.options.insert(k, v);
    }

    let prompt = if args.json {
        let mut messages = Vec::new();
        if let Some(system) = &args.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(user));
        Prompt::conversation(messages)
    } else {
        Prompt::from_parts(args.system.clone(), Some(user), None)?
    };

    let retry = client.settings().retry;
    let out = client
        .chat_with(prompt, params, retry, cancellation(args))
        .await?;

    let mut stdout = std::io::stdout();
    match out {
        ChatOutput::Text(s) => writeln!(stdout, "{s}")?,
        ChatOutput::Structured(r) => {
            writeln!(stdout, "{}", serde_json::to_string_pretty(&r)?)?;
            if let Some(e) = &r.error {
                tracing::warn!(error = %e, "chat failed");
            }
        }
        ChatOutput::Stream(mut s) => {
            let mut failed = None;
            while let Some(frag) = s.next().await {
                if args.json {
                    writeln!(stdout, "{}", serde_json::to_string(&frag)?)?;
                } else {
                    write!(stdout, "{}", frag.content())?;
                }
                stdout.flush().ok();
                if let Some(e) = frag.error() {
                    failed = Some(e.to_string());
                }
            }
            if !args.json {
                writeln!(stdout)?;
            }
            if let Some(e) = failed {
                anyhow::bail!("stream ended with error: {e}");
            }
        }
    }
    Ok(())
}

pub async fn cmd_repl(client: &ChatClient, system: Option<String>) -> anyhow::Result<()> {
    let mut history = Vec::new();
    if let Some(system) = system {
        history.push(Message::system(system));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush().ok();

        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let reply = client.chat_with_history(&mut history, line).await;
        writeln!(stdout, "{reply}\n")?;
        if reply.is_empty() || reply == client.settings().fallback_message {
            // Drop the unanswered turn so the next one is not sent twice.
            history.pop();
        } else {
            history.push(Message::assistant(reply));
        }
    }
    Ok(())
}
