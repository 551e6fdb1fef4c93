//! Seed data script - populates the database with a demo storefront
//!
//! Run with: cargo run --bin seed-data
//!
//! This creates:
//! - 4 brands
//! - 8 products with sizes 38-44 and stock
//! - an admin account (only while no admin exists)

use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use shoe_shop_api::{
    config::AppConfig,
    db,
    entities::{Gender, ProductCategory},
    handlers::AppServices,
    services::{
        brands::BrandInput,
        catalog::{CreateProductInput, SizeStock},
        identity::RegisterInput,
        IdentityService,
    },
};

#[derive(Parser)]
#[command(name = "seed-data", about = "Populate the shoe-shop database with demo data", version)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://shoe_shop.db?mode=rwc")]
    database_url: String,
    #[arg(long, env = "SEED_ADMIN_EMAIL", default_value = "admin@shoeshop.local")]
    admin_email: String,
    #[arg(long, env = "SEED_ADMIN_PASSWORD", default_value = "admin123")]
    admin_password: String,
}

struct DemoProduct {
    brand: &'static str,
    name: &'static str,
    price: i64,
    category: ProductCategory,
    gender: Gender,
}

const BRANDS: [&str; 4] = ["Nike", "Adidas", "Puma", "Vans"];

const PRODUCTS: [DemoProduct; 8] = [
    DemoProduct { brand: "Nike", name: "Nike Air Zoom Pegasus 40", price: 3_200_000, category: ProductCategory::Running, gender: Gender::Male },
    DemoProduct { brand: "Nike", name: "Nike Air Force 1", price: 2_900_000, category: ProductCategory::Sneaker, gender: Gender::Unisex },
    DemoProduct { brand: "Adidas", name: "Adidas Ultraboost Light", price: 4_500_000, category: ProductCategory::Running, gender: Gender::Female },
    DemoProduct { brand: "Adidas", name: "Adidas Samba OG", price: 2_700_000, category: ProductCategory::Sneaker, gender: Gender::Unisex },
    DemoProduct { brand: "Puma", name: "Puma Suede Classic", price: 1_900_000, category: ProductCategory::Sneaker, gender: Gender::Unisex },
    DemoProduct { brand: "Puma", name: "Puma Deviate Nitro 2", price: 3_600_000, category: ProductCategory::Sport, gender: Gender::Male },
    DemoProduct { brand: "Vans", name: "Vans Old Skool", price: 1_650_000, category: ProductCategory::Sneaker, gender: Gender::Unisex },
    DemoProduct { brand: "Vans", name: "Vans Slide-On", price: 850_000, category: ProductCategory::Sandal, gender: Gender::Female },
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    info!("=== Shoe Shop Seed Data ===");

    let config = AppConfig::new(
        cli.database_url.clone(),
        "seed-only-secret-not-used-for-serving".to_string(),
        "127.0.0.1".to_string(),
        0,
        "development".to_string(),
    );
    let pool = Arc::new(db::establish_connection_from_app_config(&config).await?);
    db::run_migrations(&pool).await?;
    let services = AppServices::new(pool.clone(), &config)?;

    info!("Creating brands...");
    let existing = services.brands.list_brands().await?;
    let mut brand_ids = Vec::new();
    for name in BRANDS {
        let brand = match existing.iter().find(|b| b.name == name) {
            Some(brand) => brand.clone(),
            None => {
                services
                    .brands
                    .create_brand(BrandInput {
                        name: name.to_string(),
                    })
                    .await?
            }
        };
        brand_ids.push((name, brand.id));
    }
    info!("  {} brands ready", brand_ids.len());

    info!("Creating products...");
    let mut created = 0;
    for demo in &PRODUCTS {
        let Some((_, brand_id)) = brand_ids.iter().find(|(name, _)| *name == demo.brand) else {
            continue;
        };
        let sizes = (38..=44)
            .map(|size| SizeStock {
                size,
                stock: 5 + (size % 4) * 3,
            })
            .collect();
        services
            .catalog
            .create_product(CreateProductInput {
                brand_id: *brand_id,
                name: demo.name.to_string(),
                price: demo.price,
                description: format!("{} from the {} line-up.", demo.name, demo.brand),
                images: Vec::new(),
                category: Some(demo.category),
                gender: demo.gender,
                sizes,
            })
            .await?;
        created += 1;
    }
    info!("  Created {} products", created);

    // Bootstrap goes through registration so the single-admin rule applies.
    let bootstrap_secret = uuid::Uuid::new_v4().to_string();
    let identity = IdentityService::new(
        pool.clone(),
        services.auth.clone(),
        Some(bootstrap_secret.clone()),
    );
    let session = identity
        .register(RegisterInput {
            name: "Shop Admin".to_string(),
            email: cli.admin_email.clone(),
            password: cli.admin_password.clone(),
            avatar: None,
            phone: None,
            address: None,
            admin_secret: Some(bootstrap_secret),
        })
        .await;
    match session {
        Ok(session) => info!(email = %session.user.email, role = %session.user.role, "Admin account ready"),
        Err(e) => warn!("Skipped admin account: {}", e),
    }

    info!("=== Seed complete ===");
    Ok(())
}
