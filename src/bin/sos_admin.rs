use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sos_store::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{OrderModel, OrderStatus},
    events::{self, EventSender},
    services::{
        format_tracking_code, parse_tracking_code, Actor, CatalogService, OrderDetails,
        OrderService, ProductFilter, SalesLedger,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to apply migrations")?;
            println!("Migrations applied");
        }
        Commands::Track(args) => handle_track(&context, args, cli.json).await?,
        Commands::Advance(args) => handle_advance(&context, args, cli.json).await?,
        Commands::Cancel(args) => handle_cancel(&context, args, cli.json).await?,
        Commands::Orders(args) => handle_list_orders(&context, args, cli.json).await?,
        Commands::Products => handle_list_products(&context, cli.json).await?,
        Commands::Sales(args) => handle_sales(&context, args, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "sos-admin", about = "Staff tooling for the shoe store", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Show an order by tracking code
    Track(TrackingCodeArgs),
    /// Move an order one step along the fulfillment path
    Advance(TrackingCodeArgs),
    /// Cancel a pending or processing order and restore its stock
    Cancel(TrackingCodeArgs),
    /// List orders, oldest first
    Orders(ListOrdersArgs),
    /// List products currently for sale
    Products,
    /// Summarize completed sales
    Sales(SalesArgs),
}

#[derive(Args)]
struct TrackingCodeArgs {
    #[arg(help = "Tracking code, e.g. SOS007")]
    code: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderStatusArg {
    Pending,
    Processing,
    ToShip,
    Shipped,
    Completed,
    Cancelled,
}

impl From<OrderStatusArg> for OrderStatus {
    fn from(value: OrderStatusArg) -> Self {
        match value {
            OrderStatusArg::Pending => OrderStatus::Pending,
            OrderStatusArg::Processing => OrderStatus::Processing,
            OrderStatusArg::ToShip => OrderStatus::ToShip,
            OrderStatusArg::Shipped => OrderStatus::Shipped,
            OrderStatusArg::Completed => OrderStatus::Completed,
            OrderStatusArg::Cancelled => OrderStatus::Cancelled,
        }
    }
}

#[derive(Args)]
struct ListOrdersArgs {
    #[arg(long, value_enum, help = "Only orders in this status")]
    status: Option<OrderStatusArg>,
}

#[derive(Args)]
struct SalesArgs {
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(1..), help = "Report window in days, ending now")]
    days: i64,
}

#[derive(Serialize)]
struct OrderRow {
    tracking_code: String,
    customer_id: i32,
    status: String,
    total: String,
}

impl From<&OrderModel> for OrderRow {
    fn from(order: &OrderModel) -> Self {
        Self {
            tracking_code: format_tracking_code(order.id),
            customer_id: order.customer_id,
            status: order.status.to_string(),
            total: order.total_price.to_string(),
        }
    }
}

struct CliContext {
    _config: AppConfig,
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);
        if config.auto_migrate {
            db::run_migrations(&db)
                .await
                .context("failed to apply migrations")?;
        }

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        Ok(Self {
            _config: config,
            db,
            event_sender,
        })
    }

    fn order_service(&self) -> OrderService {
        OrderService::new(self.db.clone(), Some(self.event_sender.clone()))
    }

    fn catalog_service(&self) -> CatalogService {
        CatalogService::new(self.db.clone(), Some(self.event_sender.clone()))
    }

    fn sales_ledger(&self) -> SalesLedger {
        SalesLedger::new(self.db.clone())
    }
}

async fn handle_track(context: &CliContext, args: TrackingCodeArgs, json: bool) -> Result<()> {
    let details = context
        .order_service()
        .find_by_tracking_code(&args.code, Actor::Staff)
        .await
        .with_context(|| format!("failed to look up {}", args.code))?;

    if json {
        return print_json(&details);
    }
    print_order_details(&details);
    Ok(())
}

async fn handle_advance(context: &CliContext, args: TrackingCodeArgs, json: bool) -> Result<()> {
    let order_id = parse_tracking_code(&args.code)?;
    let order = context
        .order_service()
        .advance_order(order_id)
        .await
        .with_context(|| format!("failed to advance {}", args.code))?;

    if json {
        return print_json(&OrderRow::from(&order));
    }
    println!("{} is now {}", format_tracking_code(order.id), order.status);
    Ok(())
}

async fn handle_cancel(context: &CliContext, args: TrackingCodeArgs, json: bool) -> Result<()> {
    let order_id = parse_tracking_code(&args.code)?;
    let order = context
        .order_service()
        .cancel_order(order_id, Actor::Staff)
        .await
        .with_context(|| format!("failed to cancel {}", args.code))?;

    if json {
        return print_json(&OrderRow::from(&order));
    }
    println!("{} cancelled; stock restored", format_tracking_code(order.id));
    Ok(())
}

async fn handle_list_orders(context: &CliContext, args: ListOrdersArgs, json: bool) -> Result<()> {
    let orders = context
        .order_service()
        .list_orders(args.status.map(OrderStatus::from))
        .await
        .context("failed to list orders")?;
    let rows: Vec<OrderRow> = orders.iter().map(OrderRow::from).collect();

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No orders");
    }
    for row in rows {
        println!(
            "{:<10} customer {:<6} {:<12} {:>10}",
            row.tracking_code, row.customer_id, row.status, row.total
        );
    }
    Ok(())
}

async fn handle_list_products(context: &CliContext, json: bool) -> Result<()> {
    let products = context
        .catalog_service()
        .list_available(&ProductFilter::default())
        .await
        .context("failed to list products")?;

    if json {
        return print_json(&products);
    }
    for product in products {
        println!(
            "#{:<5} {:<30} {:>10} stock {:>4}  colors: {}  sizes: {}",
            product.id,
            product.name,
            product.price,
            product.stock,
            product.color_options().join("/"),
            product.size_options().join("/")
        );
    }
    Ok(())
}

async fn handle_sales(context: &CliContext, args: SalesArgs, json: bool) -> Result<()> {
    let to = Utc::now();
    let from = to - Duration::days(args.days);
    let summary = context
        .sales_ledger()
        .summary(from, to)
        .await
        .context("failed to summarize sales")?;

    if json {
        return print_json(&summary);
    }
    println!(
        "Last {} days: {} completed orders, revenue {}",
        args.days, summary.orders, summary.revenue
    );
    Ok(())
}

fn print_order_details(details: &OrderDetails) {
    let order = &details.order;
    println!("Order {} ({})", details.tracking_code, order.status);
    println!("Customer: {}", order.customer_id);
    println!("Placed:   {}", order.created_at.format("%Y-%m-%d %H:%M"));
    for item in &details.items {
        println!(
            "  {} x product #{} ({}, {}) @ {} = {}",
            item.quantity,
            item.product_id,
            item.color,
            item.size,
            item.unit_price,
            item.line_total()
        );
    }
    println!("Total:    {}", order.total_price);
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
