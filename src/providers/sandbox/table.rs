//! Bootstrap program and the simulated roulette site it drives.
//!
//! `TableProgram` speaks the frame protocol and delegates the site
//! logic to a [`TableSite`]. `RouletteTable` is a European single-zero
//! wheel with either a random or a scripted spin sequence.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::types::{Selection, SelectionType};

use super::context::{ContextPort, SandboxProgram};
use super::protocol::{BetPayload, BetSettlement, LoginAck, SandboxMessage};

/// Site logic behind the bootstrap program.
#[cfg_attr(test, mockall::automock)]
pub trait TableSite: Send {
    /// Returns the account balance on success.
    fn login(&mut self, username: &str, password: &str) -> Result<Decimal, String>;

    fn place_bet(&mut self, bet: &BetPayload) -> Result<BetSettlement, String>;
}

// ---------------------------------------------------------------------------
// Bootstrap program
// ---------------------------------------------------------------------------

pub struct TableProgram<S> {
    site: S,
    logged_in: bool,
}

impl<S: TableSite> TableProgram<S> {
    pub fn new(site: S) -> Self {
        Self {
            site,
            logged_in: false,
        }
    }

    /// Turn one inbound frame into the frames to post back.
    fn handle(&mut self, message: SandboxMessage) -> Vec<SandboxMessage> {
        match message {
            SandboxMessage::Login { request_id, data } => {
                match self.site.login(&data.username, &data.password) {
                    Ok(balance) => {
                        self.logged_in = true;
                        vec![
                            SandboxMessage::log(
                                "info",
                                format!("{} logged in to {}", data.username, data.site),
                            ),
                            SandboxMessage::LoginResult {
                                request_id,
                                data: Some(LoginAck { balance }),
                                error: None,
                            },
                        ]
                    }
                    Err(error) => vec![SandboxMessage::LoginResult {
                        request_id,
                        data: None,
                        error: Some(error),
                    }],
                }
            }
            SandboxMessage::PlaceBet { request_id, data } => {
                let reply = if !self.logged_in {
                    Err("not logged in".to_string())
                } else {
                    self.site.place_bet(&data)
                };
                let (data, error) = match reply {
                    Ok(settlement) => (Some(settlement), None),
                    Err(e) => (None, Some(e)),
                };
                vec![SandboxMessage::BetResult {
                    request_id,
                    data,
                    error,
                }]
            }
            other => vec![SandboxMessage::Error {
                request_id: other.request_id().map(str::to_string),
                error: format!("unexpected {} frame", other.kind()),
            }],
        }
    }
}

#[async_trait]
impl<S: TableSite + 'static> SandboxProgram for TableProgram<S> {
    async fn run(self: Box<Self>, mut port: ContextPort) {
        let mut this = *self;
        if !port.post(&SandboxMessage::Ready).await {
            return;
        }

        while let Some(raw) = port.recv().await {
            let replies = match SandboxMessage::decode(&raw) {
                Ok(message) => this.handle(message),
                Err(e) => vec![SandboxMessage::Error {
                    request_id: None,
                    error: format!("malformed frame: {e}"),
                }],
            };
            for reply in &replies {
                if !port.post(reply).await {
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Roulette
// ---------------------------------------------------------------------------

const RED_NUMBERS: [u8; 18] = [
    1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36,
];

pub fn color_of(number: u8) -> &'static str {
    if number == 0 {
        "green"
    } else if RED_NUMBERS.contains(&number) {
        "red"
    } else {
        "black"
    }
}

enum Wheel {
    Random(StdRng),
    Scripted(VecDeque<u8>),
}

impl Wheel {
    fn spin(&mut self) -> u8 {
        match self {
            Wheel::Random(rng) => rng.gen_range(0..=36),
            Wheel::Scripted(spins) => {
                // Cycle so a short script never runs dry.
                let n = spins.pop_front().unwrap_or(0);
                spins.push_back(n);
                n
            }
        }
    }
}

/// Simulated single-zero roulette site.
pub struct RouletteTable {
    wheel: Wheel,
    balance: Decimal,
    password: Option<String>,
    bets: u64,
}

impl RouletteTable {
    pub fn new(balance: Decimal) -> Self {
        Self::with_wheel(Wheel::Random(StdRng::from_entropy()), balance)
    }

    pub fn seeded(balance: Decimal, seed: u64) -> Self {
        Self::with_wheel(Wheel::Random(StdRng::seed_from_u64(seed)), balance)
    }

    /// Wheel that lands on `spins` in order, cycling.
    pub fn scripted(balance: Decimal, spins: impl IntoIterator<Item = u8>) -> Self {
        let spins: VecDeque<u8> = spins.into_iter().map(|n| n % 37).collect();
        Self::with_wheel(Wheel::Scripted(spins), balance)
    }

    /// Only accept this password at login.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn with_wheel(wheel: Wheel, balance: Decimal) -> Self {
        Self {
            wheel,
            balance,
            password: None,
            bets: 0,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }
}

impl TableSite for RouletteTable {
    fn login(&mut self, username: &str, password: &str) -> Result<Decimal, String> {
        if username.is_empty() {
            return Err("username is required".to_string());
        }
        match &self.password {
            Some(expected) if expected != password => Err("invalid credentials".to_string()),
            _ => Ok(self.balance),
        }
    }

    fn place_bet(&mut self, bet: &BetPayload) -> Result<BetSettlement, String> {
        if bet.total_amount > self.balance {
            return Err(format!(
                "insufficient balance: {} < {}",
                self.balance, bet.total_amount
            ));
        }

        let winning_number = self.wheel.spin();
        let payout = settle(&bet.selections, winning_number)?;
        let profit = payout - bet.total_amount;
        self.balance += profit;
        self.bets += 1;

        Ok(BetSettlement {
            bet_id: format!("RT-{}", self.bets),
            winning_number,
            winning_color: color_of(winning_number).to_string(),
            payout,
            profit,
            balance: Some(self.balance),
        })
    }
}

/// Total returned (stake included) for `selections` when the ball lands
/// on `number`.
pub fn settle(selections: &[Selection], number: u8) -> Result<Decimal, String> {
    let mut payout = Decimal::ZERO;
    for selection in selections {
        if let Some(multiplier) = winning_multiplier(selection, number)? {
            payout += selection.amount * Decimal::from(multiplier);
        }
    }
    Ok(payout)
}

fn winning_multiplier(selection: &Selection, number: u8) -> Result<Option<u32>, String> {
    let value = selection.value.trim().to_ascii_lowercase();
    let invalid = || format!("invalid {} selection: {}", selection.kind, selection.value);

    let (hit, multiplier) = match selection.kind {
        SelectionType::Straight => {
            let target: u8 = value.parse().map_err(|_| invalid())?;
            if target > 36 {
                return Err(invalid());
            }
            (target == number, 36)
        }
        SelectionType::Color => match value.as_str() {
            "red" | "black" => (color_of(number) == value, 2),
            _ => return Err(invalid()),
        },
        SelectionType::Parity => match value.as_str() {
            "even" => (number % 2 == 0, 2),
            "odd" => (number % 2 == 1, 2),
            _ => return Err(invalid()),
        },
        SelectionType::Range => match value.as_str() {
            "low" => (number <= 18, 2),
            "high" => (number >= 19, 2),
            _ => return Err(invalid()),
        },
        SelectionType::Dozen => {
            let dozen: u8 = value.parse().map_err(|_| invalid())?;
            if !(1..=3).contains(&dozen) {
                return Err(invalid());
            }
            ((number + 11) / 12 == dozen, 3)
        }
        SelectionType::Column => {
            let column: u8 = value.parse().map_err(|_| invalid())?;
            if !(1..=3).contains(&column) {
                return Err(invalid());
            }
            ((number + 2) % 3 + 1 == column, 3)
        }
    };

    // Zero loses every outside bet.
    let outside = selection.kind != SelectionType::Straight;
    Ok((hit && !(outside && number == 0)).then_some(multiplier))
}
