use comfy_table::{presets::UTF8_FULL, Table};
use rand::Rng;
use serde::{Deserialize, Serialize};
use showdown_core::{AccountRef, Amount, Choice, LocalCustodian, Side, Storage, Wager, WagerStatus};
use showdown_engine::{EngineConfig, SettlementCoordinator, WagerEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Player registry and custodian balances, persisted between CLI
/// invocations. The wagers themselves live in the sqlite store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct BankFile {
    players: HashMap<String, AccountRef>,
    balances: HashMap<String, u64>,
}

pub struct Context {
    pub coordinator: SettlementCoordinator,
    pub custodian: Arc<LocalCustodian>,
    players: Mutex<HashMap<String, AccountRef>>,
    bank_path: PathBuf,
}

impl Context {
    pub async fn open(data_dir: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let bank_path = data_dir.join("bank.json");
        let bank = load_bank(&bank_path);

        let custodian = Arc::new(LocalCustodian::new());
        custodian.restore(
            bank.balances
                .iter()
                .map(|(account, units)| (AccountRef(account.clone()), Amount::from_units(*units)))
                .collect(),
        );

        let storage = Arc::new(Storage::new(&data_dir.join("showdown.db")).await?);
        let coordinator =
            SettlementCoordinator::new(storage, custodian.clone(), EngineConfig::default());

        Ok(Self {
            coordinator,
            custodian,
            players: Mutex::new(bank.players),
            bank_path,
        })
    }

    pub fn save_bank(&self) -> Result<(), Box<dyn std::error::Error>> {
        let bank = BankFile {
            players: self.players.lock().unwrap().clone(),
            balances: self
                .custodian
                .snapshot()
                .into_iter()
                .map(|(account, amount)| (account.0, amount.to_units()))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&bank)?;
        std::fs::write(&self.bank_path, content)?;
        Ok(())
    }

    fn account_of(&self, name: &str) -> Result<AccountRef, Box<dyn std::error::Error>> {
        self.players
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| format!("player '{}' is not registered (run `showdown register {}`)", name, name).into())
    }
}

fn load_bank(path: &Path) -> BankFile {
    if path.exists() {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(bank) = serde_json::from_str(&content) {
                return bank;
            }
        }
    }
    BankFile::default()
}

fn parse_id(wager_id: &str) -> Result<Uuid, Box<dyn std::error::Error>> {
    Ok(Uuid::parse_str(wager_id)?)
}

pub async fn register(ctx: &Context, name: &str, funds: u64) -> CmdResult {
    {
        let players = ctx.players.lock().unwrap();
        if players.contains_key(name) {
            return Err(format!("player '{}' already registered", name).into());
        }
    }

    let account = ctx.custodian.open_account(Amount::from_units(funds));
    ctx.players
        .lock()
        .unwrap()
        .insert(name.to_string(), account.clone());

    println!("Registered player '{}'", name);
    println!("Account: {}", account);
    println!("Balance: {}", Amount::from_units(funds));
    Ok(())
}

pub async fn balance(ctx: &Context, name: &str) -> CmdResult {
    use showdown_core::FundsCustodian;
    let account = ctx.account_of(name)?;
    let balance = ctx.custodian.balance(&account).await?;
    println!("{}: {}", name, balance);
    Ok(())
}

pub async fn create_wager(ctx: &Context, name: &str, stake: u64) -> CmdResult {
    let account = ctx.account_of(name)?;
    let wager = ctx
        .coordinator
        .create(name, &account, Amount::from_units(stake))
        .await?;

    println!("Created wager {}", wager.id);
    println!("Stake: {}", wager.stake);
    println!("Escrow account: {}", wager.custody_account);
    println!("Waiting for a challenger...");
    println!();
    println!("Share this command with your opponent:");
    println!("showdown join <their-name> {}", wager.id);
    Ok(())
}

pub async fn join_wager(ctx: &Context, name: &str, wager_id: &str) -> CmdResult {
    let id = parse_id(wager_id)?;
    let account = ctx.account_of(name)?;
    let wager = ctx.coordinator.get(id).await?;

    let joined = ctx
        .coordinator
        .join(id, name, &account, wager.stake)
        .await?;

    println!("Joined wager {} with a stake of {}", id, joined.stake);
    println!("Pot: {}", joined.pot);
    if let Some(deadline) = joined.choice_deadline {
        println!("Choices are due by {}", deadline.format("%H:%M:%S"));
    }
    println!();
    println!("Submit your choice with:");
    println!("showdown play {} {} <rock|paper|scissors>", name, id);
    Ok(())
}

pub async fn play(ctx: &Context, name: &str, wager_id: &str, choice: Choice) -> CmdResult {
    let id = parse_id(wager_id)?;
    let wager = ctx.coordinator.submit_choice(id, name, choice).await?;

    println!("You played {}", choice);
    match wager.status {
        WagerStatus::Settled => {
            let winner = winner_name(&wager);
            println!("Wager settled! Winner: {}", winner);
        }
        WagerStatus::Active if !wager.both_choices_made() && wager.committed_sides().is_empty() => {
            println!("Round tied. Choices cleared, a new round has started.");
        }
        WagerStatus::Active => {
            println!("Waiting for your opponent's choice...");
            if let Some(deadline) = wager.choice_deadline {
                println!("They forfeit if they don't play by {}", deadline.format("%H:%M:%S"));
            }
        }
        other => println!("Wager is now {}", other),
    }
    Ok(())
}

pub async fn show_status(ctx: &Context, wager_id: &str) -> CmdResult {
    let id = parse_id(wager_id)?;
    let wager = ctx.coordinator.get(id).await?;
    print_wager(&wager);
    Ok(())
}

pub async fn list_open(ctx: &Context) -> CmdResult {
    let wagers = ctx.coordinator.list_open().await?;
    if wagers.is_empty() {
        println!("No open wagers.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Creator", "Stake", "Created", "Reserved for"]);
    for wager in wagers {
        table.add_row(vec![
            wager.id.to_string(),
            wager.creator.name.clone(),
            wager.stake.to_string(),
            wager.created_at.format("%Y-%m-%d %H:%M").to_string(),
            wager.invited.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn leaderboard(ctx: &Context) -> CmdResult {
    let standings = ctx.coordinator.standings().await?;
    if standings.is_empty() {
        println!("No settled wagers yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Player", "Wins", "Winnings"]);
    for (rank, entry) in standings.iter().enumerate() {
        table.add_row(vec![
            (rank + 1).to_string(),
            entry.name.clone(),
            entry.wins.to_string(),
            entry.winnings.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn cancel_wager(ctx: &Context, name: &str, wager_id: &str) -> CmdResult {
    let id = parse_id(wager_id)?;
    let wager = ctx.coordinator.get(id).await?;

    let confirmed = dialoguer::Confirm::new()
        .with_prompt(format!(
            "Cancel wager {} and refund {} to {}?",
            id, wager.pot, name
        ))
        .default(false)
        .interact()?;
    if !confirmed {
        println!("Aborted.");
        return Ok(());
    }

    ctx.coordinator.cancel(id, name).await?;
    println!("Wager cancelled, stake refunded.");
    Ok(())
}

pub async fn rematch(ctx: &Context, name: &str, wager_id: &str) -> CmdResult {
    let id = parse_id(wager_id)?;
    let wager = ctx.coordinator.rematch(id, name).await?;

    println!("Rematch created: {}", wager.id);
    println!("Your stake of {} is escrowed.", wager.stake);
    println!(
        "Seat reserved for {}; they join with:",
        wager.invited.as_deref().unwrap_or("?")
    );
    println!(
        "showdown join {} {}",
        wager.invited.as_deref().unwrap_or("<name>"),
        wager.id
    );
    Ok(())
}

/// Re-arm forfeit timers from stored deadlines and follow one wager
/// until it reaches a terminal state.
pub async fn watch(ctx: &Context, wager_id: &str) -> CmdResult {
    let id = parse_id(wager_id)?;
    let mut events = ctx.coordinator.subscribe();
    ctx.coordinator.resume().await?;

    let wager = ctx.coordinator.get(id).await?;
    print_wager(&wager);
    if matches!(wager.status, WagerStatus::Settled | WagerStatus::Cancelled) {
        return Ok(());
    }

    println!("Watching... (Ctrl-C to stop)");
    loop {
        let event = events.recv().await?;
        if event.wager_id() != id {
            continue;
        }
        match event {
            WagerEvent::Joined { challenger, .. } => {
                println!("{} joined the wager", challenger)
            }
            WagerEvent::ChoiceSubmitted { side, .. } => println!("{} made their choice", side),
            WagerEvent::Reset { .. } => println!("Round reset, deadline re-armed"),
            WagerEvent::Settled {
                winner,
                amount,
                by_forfeit,
                ..
            } => {
                let wager = ctx.coordinator.get(id).await?;
                let name = wager
                    .participant(winner)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| winner.to_string());
                if by_forfeit {
                    println!("{} wins {} by forfeit", name, amount);
                } else {
                    println!("{} wins {}", name, amount);
                }
                break;
            }
            WagerEvent::Cancelled { .. } => {
                println!("Wager cancelled by the creator");
                break;
            }
            WagerEvent::Created { .. } => {}
        }
    }
    Ok(())
}

/// Scripted full lifecycle against a computer opponent: register two
/// demo wallets, wager, play random hands until someone wins.
pub async fn demo(ctx: &Context) -> CmdResult {
    let you = format!("demo-you-{}", &Uuid::new_v4().to_string()[..8]);
    let computer = format!("demo-cpu-{}", &Uuid::new_v4().to_string()[..8]);
    let your_account = ctx.custodian.open_account(Amount::from_units(5_000));
    let cpu_account = ctx.custodian.open_account(Amount::from_units(5_000));
    {
        let mut players = ctx.players.lock().unwrap();
        players.insert(you.clone(), your_account.clone());
        players.insert(computer.clone(), cpu_account.clone());
    }

    let stake = Amount::from_units(1_000);
    println!("Players: {} vs {} (stake {})", you, computer, stake);

    let wager = ctx.coordinator.create(&you, &your_account, stake).await?;
    println!("Created wager {} ({})", wager.id, wager.status);

    let wager = ctx
        .coordinator
        .join(wager.id, &computer, &cpu_account, stake)
        .await?;
    println!("Computer joined, pot is {}", wager.pot);

    let mut round = 1;
    loop {
        let yours = random_choice();
        let theirs = random_choice();
        println!("Round {}: you play {}, computer plays {}", round, yours, theirs);

        ctx.coordinator.submit_choice(wager.id, &you, yours).await?;
        let after = ctx
            .coordinator
            .submit_choice(wager.id, &computer, theirs)
            .await?;

        if after.status == WagerStatus::Settled {
            println!("Winner: {}", winner_name(&after));
            break;
        }
        println!("Tie, new round starts");
        round += 1;
    }

    use showdown_core::FundsCustodian;
    println!(
        "Final balances: you {}, computer {}",
        ctx.custodian.balance(&your_account).await?,
        ctx.custodian.balance(&cpu_account).await?
    );
    Ok(())
}

fn random_choice() -> Choice {
    match rand::thread_rng().gen_range(0..3) {
        0 => Choice::Rock,
        1 => Choice::Paper,
        _ => Choice::Scissors,
    }
}

fn winner_name(wager: &Wager) -> String {
    match wager.winner {
        Some(side) => wager
            .participant(side)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| side.to_string()),
        None => "-".to_string(),
    }
}

fn print_wager(wager: &Wager) {
    println!("Wager {}", wager.id);
    println!("  Status:     {}", wager.status);
    println!("  Stake:      {}", wager.stake);
    println!("  Pot:        {}", wager.pot);
    println!("  Creator:    {}", wager.creator.name);
    println!(
        "  Challenger: {}",
        wager
            .challenger
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or("-")
    );
    println!(
        "  Choices:    creator {} / challenger {}",
        committed(wager, Side::Creator),
        committed(wager, Side::Challenger)
    );
    if let Some(deadline) = wager.choice_deadline {
        println!("  Deadline:   {}", deadline.format("%Y-%m-%d %H:%M:%S"));
    }
    if wager.status == WagerStatus::Settled {
        println!("  Winner:     {}", winner_name(wager));
    }
    if let Some(old) = wager.rematch_of {
        println!("  Rematch of: {}", old);
    }
}

// Committed choices stay hidden until the round is over; only reveal
// whether a seat has played.
fn committed(wager: &Wager, side: Side) -> &'static str {
    match wager.choice_of(side) {
        Some(_) => "committed",
        None => "pending",
    }
}
