//! `toolbridge chat`: interactive or single-message chat mode.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use toolbridge_agent::{Bridge, BridgeReply, ExchangeRequest, ToolNotifier};
use toolbridge_cli::{build_bridge, load_config};
use toolbridge_core::message::{ConversationId, Message};

fn notifier() -> ToolNotifier {
    Arc::new(|label: &str| eprint!("{label} "))
}

/// A request from `user`, limited to `tools` when any are named.
fn exchange(input: &str, user: &str, tools: &[String]) -> ExchangeRequest {
    let request = ExchangeRequest::new(input)
        .with_user(user)
        .with_notifier(notifier());
    if tools.is_empty() {
        request
    } else {
        request.with_tool_limit(tools.iter().cloned())
    }
}

fn print_reply(reply: &BridgeReply) {
    if !reply.tools_used.is_empty() {
        eprintln!();
    }
    println!();
    for line in reply.content().lines() {
        println!("  Assistant > {line}");
    }
    if reply.needs_retry {
        eprintln!("  (the reply above did not pass source verification)");
    }
    println!();
}

pub async fn run(
    config_path: Option<&Path>,
    message: Option<String>,
    user: String,
    tools: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let bridge = build_bridge(&config)?;
    let tool_count = bridge.initialize(false).await;

    if let Some(msg) = message {
        let reply = bridge.chat(exchange(&msg, &user, &tools)).await?;
        if !reply.tools_used.is_empty() {
            eprintln!();
        }
        println!("{}", reply.content());
        bridge.close().await;
        return Ok(());
    }

    println!();
    println!("  Toolbridge chat");
    println!();
    println!("  Backend:   {} ({})", config.llm.backend, config.llm.base_url);
    println!("  Model:     {}", config.llm.model);
    if tools.is_empty() {
        println!("  Tools:     {tool_count}");
    } else {
        println!("  Tools:     {} of {tool_count}", tools.join(", "));
    }
    println!("  User:      {user}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  '/clear' starts over, 'exit' or Ctrl+D quits.");
    println!();

    repl(&bridge, &user, &tools).await?;
    bridge.close().await;

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

async fn repl(bridge: &Bridge, user: &str, tools: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut history: Vec<Message> = Vec::new();
    let mut conversation = ConversationId::new();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                history.clear();
                conversation = ConversationId::new();
                println!("  (history cleared)");
                continue;
            }
            _ => {}
        }

        let request = exchange(input, user, tools)
            .with_history(history.clone())
            .with_conversation(conversation.to_string());

        match bridge.chat(request).await {
            Ok(reply) => {
                print_reply(&reply);
                history.push(Message::user(input));
                history.push(reply.message);
            }
            Err(e) => {
                eprintln!();
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }
    Ok(())
}
