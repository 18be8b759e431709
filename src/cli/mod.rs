use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use crate::client::BazaarClient;
use crate::config::FlatConfig;
use crate::entities::{InsertResult, Item, User};
use crate::materializer::EnrichmentOutcome;

#[derive(Parser, Debug)]
#[command(name = "bazaar", version, about = "Item listings with unique slugs and generated images")]
pub struct Cli {
    #[command(flatten)]
    pub config: FlatConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage users
    #[command(subcommand)]
    User(UserCommand),
    /// Manage items
    #[command(subcommand)]
    Item(ItemCommand),
    /// Add an item to a user's favorites and refresh its count
    Favorite { username: String, slug: String },
    /// Remove an item from a user's favorites and refresh its count
    Unfavorite { username: String, slug: String },
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    Add {
        username: String,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },
    Follow { username: String, target: String },
}

#[derive(Subcommand, Debug)]
pub enum ItemCommand {
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        seller: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        slug: Option<String>,
    },
    Show {
        slug: String,
        #[arg(long)]
        viewer: Option<String>,
    },
    List {
        #[arg(long)]
        viewer: Option<String>,
    },
    /// Recount favorites for an item
    Refresh { slug: String },
}

pub async fn run(client: &BazaarClient, command: Command, cancel: &CancellationToken) -> anyhow::Result<()> {
    match command {
        Command::User(UserCommand::Add { username, bio, image }) => {
            let user = User { bio, image, ..User::new(username) };
            match client.create_user(user).await? {
                InsertResult::New(user) => println!("{} {}", "User created:".green(), user.username),
                InsertResult::Existing(user) => println!("{} {}", "User already exists:".yellow(), user.username),
            }
        }
        Command::User(UserCommand::Follow { username, target }) => {
            if client.follow(&username, &target).await? {
                println!("{} {} -> {}", "Following:".green(), username, target);
            } else {
                println!("{} {} -> {}", "Already following:".yellow(), username, target);
            }
        }
        Command::Item(ItemCommand::Create { title, description, seller, tags, image, slug }) => {
            let mut item = Item::new(title, description, seller).with_tags(tags);
            item.image = image;
            item.slug = slug;
            let materialized = client.create_item(item, cancel).await?;
            if let EnrichmentOutcome::Failed(e) = &materialized.enrichment {
                eprintln!("{} {}", "Item saved without image:".yellow(), e);
            }
            print_item(client, &materialized.item, None).await?;
        }
        Command::Item(ItemCommand::Show { slug, viewer }) => {
            let item = client.get_item(&slug).await?;
            print_item(client, &item, viewer.as_deref()).await?;
        }
        Command::Item(ItemCommand::List { viewer }) => {
            let mut responses = Vec::new();
            for item in client.list_items().await? {
                responses.push(client.render_item(&item, viewer.as_deref()).await?);
            }
            println!("{}", serde_json::to_string_pretty(&responses)?);
        }
        Command::Item(ItemCommand::Refresh { slug }) => {
            let item = client.refresh_favorite_count(&slug).await?;
            print_item(client, &item, None).await?;
        }
        Command::Favorite { username, slug } => {
            let item = client.favorite(&username, &slug).await?;
            print_item(client, &item, Some(&username)).await?;
        }
        Command::Unfavorite { username, slug } => {
            let item = client.unfavorite(&username, &slug).await?;
            print_item(client, &item, Some(&username)).await?;
        }
    }
    Ok(())
}

async fn print_item(client: &BazaarClient, item: &Item, viewer: Option<&str>) -> anyhow::Result<()> {
    let response = client.render_item(item, viewer).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
