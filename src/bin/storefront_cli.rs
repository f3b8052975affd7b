use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use serde::Serialize;
use storefront_api::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::product,
    payments::webhook::sign_payload,
    services::orders::OrderQueryService,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::SignWebhook(args) => handle_sign_webhook(args)?,
        Commands::Migrate => {
            let context = CliContext::initialize().await?;
            db::run_migrations(&context.db)
                .await
                .context("failed to apply migrations")?;
            println!("Migrations applied");
        }
        Commands::Products(command) => {
            let context = CliContext::initialize().await?;
            handle_products_command(&context, command, cli.json).await?
        }
        Commands::Order(args) => {
            let context = CliContext::initialize().await?;
            handle_order(&context, args, cli.json).await?
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "storefront",
    about = "Storefront CLI for catalog setup, order lookup and webhook testing",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Products(ProductsCommands),
    /// Show an order and its line snapshot
    Order(OrderArgs),
    /// Print a signature header for a webhook payload
    SignWebhook(SignWebhookArgs),
}

#[derive(Subcommand)]
enum ProductsCommands {
    Create(ProductCreateArgs),
    List,
}

#[derive(Args)]
struct ProductCreateArgs {
    #[arg(long, help = "Display name of the product")]
    name: String,
    #[arg(long, help = "Regular unit price, e.g. 19.99")]
    price: Decimal,
    #[arg(long, help = "Promotional unit price")]
    sale_price: Option<Decimal>,
    #[arg(long, action = ArgAction::SetTrue, help = "Charge the sale price")]
    on_sale: bool,
    #[arg(long, default_value_t = 0, help = "Units on hand")]
    stock: i32,
}

#[derive(Args)]
struct OrderArgs {
    #[arg(help = "Order id")]
    id: Uuid,
}

#[derive(Args)]
struct SignWebhookArgs {
    #[arg(long, help = "Webhook signing secret")]
    secret: String,
    #[arg(long, conflicts_with = "payload", help = "Read the payload from a file")]
    file: Option<PathBuf>,
    #[arg(long, help = "Inline JSON payload")]
    payload: Option<String>,
    #[arg(long, help = "Unix timestamp to sign with; defaults to now")]
    timestamp: Option<i64>,
}

struct CliContext {
    _config: AppConfig,
    db: Arc<DbPool>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;

        Ok(Self {
            _config: config,
            db: Arc::new(db_pool),
        })
    }
}

async fn handle_products_command(
    context: &CliContext,
    command: ProductsCommands,
    json: bool,
) -> Result<()> {
    match command {
        ProductsCommands::Create(args) => {
            if args.price < Decimal::ZERO {
                return Err(anyhow!("price must not be negative"));
            }
            if args.on_sale && args.sale_price.is_none() {
                return Err(anyhow!("--on-sale requires --sale-price"));
            }

            let model = product::ActiveModel {
                id: Set(Uuid::new_v4()),
                name: Set(args.name),
                price: Set(args.price),
                sale_price: Set(args.sale_price),
                on_sale: Set(args.on_sale),
                stock: Set(args.stock),
                ..Default::default()
            }
            .insert(context.db.as_ref())
            .await
            .context("failed to create product")?;

            if json {
                print_json(&model)?;
            } else {
                render_product(&model);
            }
        }
        ProductsCommands::List => {
            let products = product::Entity::find()
                .order_by_asc(product::Column::Name)
                .all(context.db.as_ref())
                .await
                .context("failed to list products")?;

            if json {
                print_json(&products)?;
            } else if products.is_empty() {
                println!("No products found");
            } else {
                for model in &products {
                    render_product(model);
                }
            }
        }
    }

    Ok(())
}

async fn handle_order(context: &CliContext, args: OrderArgs, json: bool) -> Result<()> {
    let order = OrderQueryService::new(context.db.clone())
        .get_order(args.id)
        .await
        .with_context(|| format!("failed to load order {}", args.id))?;

    if json {
        return print_json(&order);
    }

    println!(
        "Order {} • status {} • total {} • intent {}",
        order.order_id, order.status, order.total, order.payment_intent_id
    );
    for item in &order.items {
        println!(
            "  - product {} × {} @ {}",
            item.product_id, item.quantity, item.price
        );
    }
    Ok(())
}

fn handle_sign_webhook(args: SignWebhookArgs) -> Result<()> {
    let payload = match (args.file, args.payload) {
        (Some(path), _) => fs::read(&path)
            .with_context(|| format!("failed to read payload from {}", path.display()))?,
        (None, Some(inline)) => inline.into_bytes(),
        (None, None) => return Err(anyhow!("provide --file or --payload")),
    };
    serde_json::from_slice::<serde_json::Value>(&payload).context("payload is not valid JSON")?;

    let timestamp = args.timestamp.unwrap_or_else(|| Utc::now().timestamp());
    println!("{}", sign_payload(&payload, &args.secret, timestamp));
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_product(model: &product::Model) {
    let sale = match (model.on_sale, model.sale_price) {
        (true, Some(price)) => format!(" (on sale: {})", price),
        _ => String::new(),
    };
    println!(
        "- {} • {} • price {}{} • stock {}",
        model.id, model.name, model.price, sale, model.stock
    );
}
