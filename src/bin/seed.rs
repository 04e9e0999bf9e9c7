//! Seed script for development — populates a fresh database with sample
//! categories and quick responses, then prints API tokens.
//!
//! Usage: `cargo run --bin seed`
//!
//! Requires `DATABASE_URL` and `JWT_SECRET` environment variables (reads .env).

use std::sync::Arc;

use anyhow::Context;
use respostas::config::AppConfig;
use respostas::db::{self, PgStore};
use respostas::models::action::{ActionInput, ActionType};
use respostas::models::category::CreateCategory;
use respostas::models::response::{CreateResponse, TriggerType};
use respostas::models::user::UserRole;
use respostas::services::auth;
use respostas::services::rule_store::RuleStore;
use serde_json::json;
use uuid::Uuid;

/// Owner of all seeded rules; the printed admin token carries this id.
const SEED_OWNER: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("JWT_SECRET must be set")?;
    let db_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let pool = db::create_pool(&db_url, 5).await?;

    // Run migrations first
    sqlx::migrate!("./migrations").run(&pool).await?;

    println!("=== Quick Responses Seed Script ===");

    let store = RuleStore::new(Arc::new(PgStore::new(pool)));
    if store.list_categories(Some(SEED_OWNER)).await?.is_empty() {
        seed_rules(&store).await?;
    } else {
        println!("[skip] Seed owner already has categories");
    }

    let admin = auth::issue_token(
        "admin",
        SEED_OWNER,
        UserRole::Admin,
        &config.jwt_secret,
        config.jwt_token_expiry_secs,
    )?;
    let gateway = auth::issue_token(
        "gateway",
        SEED_OWNER,
        UserRole::Gateway,
        &config.jwt_secret,
        config.jwt_token_expiry_secs,
    )?;

    println!("\n=== Seed complete! ===");
    println!("Owner id:      {SEED_OWNER}");
    println!("Admin token:   {admin}");
    println!("Gateway token: {gateway}");

    Ok(())
}

fn text(body: &str) -> ActionInput {
    ActionInput {
        action_type: ActionType::Text,
        content: json!({ "body": body }),
        ordinal: None,
        is_active: None,
    }
}

async fn seed_rules(store: &RuleStore) -> anyhow::Result<()> {
    let sales = store
        .create_category(
            SEED_OWNER,
            &CreateCategory {
                name: "Vendas".to_string(),
                description: Some("Preços e pagamentos".to_string()),
                color: Some("#16A34A".to_string()),
                icon: Some("shopping-cart".to_string()),
                ordinal: Some(0),
                is_active: None,
            },
        )
        .await?;
    let service = store
        .create_category(
            SEED_OWNER,
            &CreateCategory {
                name: "Atendimento".to_string(),
                description: None,
                color: None,
                icon: None,
                ordinal: Some(1),
                is_active: None,
            },
        )
        .await?;
    println!("[done] Categories: {}, {}", sales.name, service.name);

    let rules = [
        CreateResponse {
            title: "Tabela de preços".to_string(),
            description: Some("Envia a tabela e a cobrança Pix".to_string()),
            category_id: Some(sales.id),
            trigger_keywords: vec!["preço".to_string(), "valor".to_string()],
            trigger_type: TriggerType::Keyword,
            is_active: None,
            is_paused: None,
            schedule_config: None,
            ordinal: Some(0),
            actions: vec![
                text("Nosso plano mensal custa R$ 49,90."),
                ActionInput {
                    action_type: ActionType::Pix,
                    content: json!({
                        "key": "financeiro@exemplo.com.br",
                        "amount_cents": 4990,
                        "description": "Plano mensal"
                    }),
                    ordinal: None,
                    is_active: None,
                },
            ],
        },
        CreateResponse {
            title: "Boas-vindas".to_string(),
            description: None,
            category_id: Some(service.id),
            trigger_keywords: Vec::new(),
            trigger_type: TriggerType::FirstMessage,
            is_active: None,
            is_paused: None,
            schedule_config: None,
            ordinal: Some(0),
            actions: vec![
                text("Olá! Obrigado por entrar em contato."),
                ActionInput {
                    action_type: ActionType::Delay,
                    content: json!({ "duration_ms": 1500 }),
                    ordinal: None,
                    is_active: None,
                },
                text("Um atendente responderá em breve."),
            ],
        },
        CreateResponse {
            title: "Fora do horário".to_string(),
            description: None,
            category_id: Some(service.id),
            trigger_keywords: Vec::new(),
            trigger_type: TriggerType::Schedule,
            is_active: None,
            is_paused: None,
            schedule_config: Some(json!({
                "start": "18:00",
                "end": "08:00",
                "utc_offset_minutes": -180
            })),
            ordinal: Some(1),
            actions: vec![text("Estamos fora do horário de atendimento.")],
        },
        CreateResponse {
            title: "Catálogo".to_string(),
            description: None,
            category_id: Some(sales.id),
            trigger_keywords: Vec::new(),
            trigger_type: TriggerType::Manual,
            is_active: None,
            is_paused: None,
            schedule_config: None,
            ordinal: Some(1),
            actions: vec![ActionInput {
                action_type: ActionType::File,
                content: json!({
                    "url": "https://exemplo.com.br/catalogo.pdf",
                    "file_name": "catalogo.pdf"
                }),
                ordinal: None,
                is_active: None,
            }],
        },
    ];

    for input in &rules {
        let rule = store.create_response(SEED_OWNER, input).await?;
        println!("[done] Rule: {} ({} actions)", rule.title, rule.actions.len());
    }
    Ok(())
}
