use std::path::PathBuf;

use chat_client::models::{Message, MessageBody};
use chat_client::session::{Credentials, Registration};
use chat_client::{ChatClient, ClientConfig, ClientError};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
commands:
  login <email> <password>
  signup <name> <email> <password>
  users
  open <peer>
  send <peer> <text>
  delete <peer> <message-id>
  online
  logout
  quit";

#[tokio::main]
async fn main() {
    env_logger::init();

    let config_file = std::env::var_os("CHAT_CONFIG").map(PathBuf::from);
    let config = match ClientConfig::load(config_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("API at {}, socket at {}", config.api_base_url, config.socket_url);

    let client = match ChatClient::from_config(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to start client: {}", e);
            std::process::exit(1);
        }
    };

    match client.restore_session().await {
        Ok(true) => println!("Session restored."),
        Ok(false) => println!("Not logged in."),
        Err(e) => error!("Failed to restore session: {}", e),
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => Ok(()),
            ["quit"] => break,
            ["login", email, password] => login(&client, email, password).await,
            ["signup", name, email, password] => signup(&client, name, email, password).await,
            ["users"] => users(&client).await,
            ["open", peer] => client.open_conversation(peer).await.map(|messages| print_messages(&messages)),
            ["send", peer, ..] => {
                let text = words[2..].join(" ");
                client.send_text(peer, &text).await.map(|m| println!("sent {}", m.id))
            }
            ["delete", peer, id] => client.delete_message(peer, id).await.map(|notice| match notice {
                Some(notice) => println!("deleted {}", notice.message_id),
                None => println!("no such message"),
            }),
            ["online"] => {
                let mut ids: Vec<String> = client.online_ids().await.into_iter().collect();
                ids.sort();
                println!("online: {}", ids.join(", "));
                Ok(())
            }
            ["logout"] => client.logout().await,
            _ => {
                println!("{HELP}");
                Ok(())
            }
        };

        if let Err(e) = result {
            report(&e);
        }
    }
}

async fn login(client: &ChatClient, email: &str, password: &str) -> Result<(), ClientError> {
    let credentials = Credentials {
        email: email.to_string(),
        password: password.to_string(),
    };
    let session = client.login(&credentials).await?;
    println!("Welcome, {}", session.display_name().unwrap_or(email));
    Ok(())
}

async fn signup(client: &ChatClient, name: &str, email: &str, password: &str) -> Result<(), ClientError> {
    let registration = Registration {
        name: name.to_string(),
        email: email.to_string(),
        password: password.to_string(),
    };
    match client.signup(&registration).await? {
        Some(_) => println!("Account created, you are logged in."),
        None => println!("Account created, please log in."),
    }
    Ok(())
}

async fn users(client: &ChatClient) -> Result<(), ClientError> {
    client.refresh_directory().await?;
    for (peer, status) in client.peers().await {
        println!("{:<24} {:<28} {:?}  [{}]", peer.name, peer.email, status, peer.id);
    }
    Ok(())
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        let body = match &message.body {
            MessageBody::Text(text) => text.clone(),
            MessageBody::Image { url, .. } => format!("[image] {url}"),
        };
        println!("{:<10} {:?}  {}  ({})", message.sender_id, message.state(), body, message.id);
    }
}

fn report(err: &ClientError) {
    if err.is_session_expired() {
        println!("Session expired. Please login again.");
    } else {
        println!("Error: {err}");
    }
}
