//! Test Application Client
//!
//! Generates random loan applications and posts them to a running scoring
//! service. Falls back to printing sample payloads when the service is not
//! reachable.

use clap::Parser;
use loan_risk_service::types::{LoanApplication, RiskAssessment};
use rand::Rng;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "test_client", about = "Send random loan applications to the scoring API")]
struct Args {
    /// Base URL of the service
    #[arg(long, env = "LOAN_RISK_URL", default_value = "http://localhost:8000")]
    url: String,

    /// Number of applications to send
    #[arg(long, default_value_t = 100)]
    count: u64,

    /// Share of applications generated from the risky profile
    #[arg(long, default_value_t = 0.2)]
    risky_rate: f64,

    /// Pause between requests
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,

    /// Log in as this user so predictions land in their history
    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, env = "LOAN_RISK_PASSWORD")]
    password: Option<String>,
}

const GENDERS: &[&str] = &["Male", "Female", "Other"];
const MARITAL_STATUSES: &[&str] = &["Single", "Married", "Divorced"];
const EDUCATION_LEVELS: &[&str] = &["High School", "Bachelor's", "Master's", "PhD", "Other"];
const PURPOSES: &[&str] = &[
    "Debt consolidation",
    "Home",
    "Car",
    "Education",
    "Business",
    "Medical",
    "Vacation",
    "Other",
];

/// Random application generator
struct ApplicationGenerator {
    rng: rand::rngs::ThreadRng,
}

impl ApplicationGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// Applicant with stable income and good credit
    fn generate_solid(&mut self) -> LoanApplication {
        let grade = self.random_choice(&["A", "B"]);
        LoanApplication {
            annual_income: self.rng.gen_range(45_000.0..150_000.0),
            debt_to_income_ratio: self.rng.gen_range(0.02..0.25),
            credit_score: self.rng.gen_range(680.0..850.0),
            loan_amount: self.rng.gen_range(2_000.0..25_000.0),
            interest_rate: self.rng.gen_range(4.0..11.0),
            gender: self.random_choice(GENDERS).to_string(),
            marital_status: self.random_choice(MARITAL_STATUSES).to_string(),
            education_level: self.random_choice(EDUCATION_LEVELS).to_string(),
            employment_status: self.random_choice(&["Employed", "Self-employed"]).to_string(),
            loan_purpose: self.random_choice(PURPOSES).to_string(),
            grade_subgrade: format!("{}{}", grade, self.rng.gen_range(1..=5)),
        }
    }

    /// Applicant with thin margins and weak credit
    fn generate_risky(&mut self) -> LoanApplication {
        let grade = self.random_choice(&["D", "E", "F"]);
        LoanApplication {
            annual_income: self.rng.gen_range(8_000.0..40_000.0),
            debt_to_income_ratio: self.rng.gen_range(0.3..0.65),
            credit_score: self.rng.gen_range(400.0..620.0),
            loan_amount: self.rng.gen_range(10_000.0..45_000.0),
            interest_rate: self.rng.gen_range(14.0..22.0),
            gender: self.random_choice(GENDERS).to_string(),
            marital_status: self.random_choice(MARITAL_STATUSES).to_string(),
            education_level: self.random_choice(EDUCATION_LEVELS).to_string(),
            employment_status: self.random_choice(&["Unemployed", "Student", "Employed"]).to_string(),
            loan_purpose: self.random_choice(PURPOSES).to_string(),
            grade_subgrade: format!("{}{}", grade, self.rng.gen_range(1..=5)),
        }
    }

    fn generate(&mut self, risky_rate: f64) -> LoanApplication {
        if self.rng.gen_bool(risky_rate.clamp(0.0, 1.0)) {
            self.generate_risky()
        } else {
            self.generate_solid()
        }
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("test_client=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let base = args.url.trim_end_matches('/').to_string();
    info!(
        url = %base,
        count = args.count,
        risky_rate = args.risky_rate,
        delay_ms = args.delay_ms,
        "Starting test client"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    if let Err(e) = client.get(format!("{}/", base)).send().await {
        warn!(error = %e, "Service unreachable. Running in dry-run mode.");
        return run_dry_mode(args.count, args.risky_rate, args.delay_ms).await;
    }

    let token = match (&args.username, &args.password) {
        (Some(username), Some(password)) => Some(login(&client, &base, username, password).await?),
        _ => None,
    };

    let mut generator = ApplicationGenerator::new();
    let mut by_level: BTreeMap<String, u64> = BTreeMap::new();
    let mut failures = 0u64;
    let start = Instant::now();

    for i in 0..args.count {
        let application = generator.generate(args.risky_rate);

        let mut request = client.post(format!("{}/api/predict", base)).json(&application);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                let assessment: RiskAssessment = response.json().await?;
                *by_level.entry(assessment.risk_level.to_string()).or_insert(0) += 1;
            }
            Ok(response) => {
                failures += 1;
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "Prediction rejected");
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, "Request failed");
            }
        }

        if (i + 1) % 10 == 0 {
            info!("Sent {}/{} applications ({} failed)", i + 1, args.count, failures);
        }

        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        sent = args.count,
        failed = failures,
        elapsed = format!("{:.1}s", elapsed),
        "Completed"
    );
    for (level, count) in &by_level {
        info!(risk_level = %level, count = count, "Results");
    }

    Ok(())
}

async fn login(client: &reqwest::Client, base: &str, username: &str, password: &str) -> anyhow::Result<String> {
    let response = client
        .post(format!("{}/api/auth/login", base))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = response.json().await?;
    let token = body["access_token"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Login response has no access_token"))?;
    info!(username = %username, "Logged in");
    Ok(token.to_string())
}

async fn run_dry_mode(count: u64, risky_rate: f64, delay_ms: u64) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no service connection)");

    let mut generator = ApplicationGenerator::new();
    for i in 0..count {
        let application = generator.generate(risky_rate);
        let json = serde_json::to_string_pretty(&application)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample application {}:\n{}", i + 1, json);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
