//! Social Engagement Module: upvotes, points, the customization shop and
//! premium usernames.
//!
//! Balance and ledger are written as two separate calls. A failure between
//! them leaves `profiles.points` out of step with the ledger until
//! [`Points::reconcile`] runs.

use std::sync::Arc;

use dashmap::DashSet;
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::models::*;
use crate::repo::{Repo, RepoError};

pub const POINTS_PER_PROBLEM: i64 = 10;
pub const ALIAS_MAX_LEN: usize = 20;

/// How many more problems must be published to cover `shortfall` points.
pub fn problems_needed(shortfall: i64) -> i64 {
    if shortfall <= 0 {
        return 0;
    }
    (shortfall + POINTS_PER_PROBLEM - 1) / POINTS_PER_PROBLEM
}

#[derive(thiserror::Error, Debug)]
pub enum EngagementError {
    #[error("sign in to continue")] LoginRequired,
    #[error("not enough points: {shortfall} more needed ({problems_needed} more problems)")]
    InsufficientPoints { shortfall: i64, problems_needed: i64 },
    #[error("a purchase is already in progress")] PurchaseInFlight,
    #[error("item already owned")] AlreadyOwned,
    #[error("invalid alias: {0}")] InvalidAlias(String),
    #[error("alias already taken")] AliasTaken,
    #[error(transparent)] Store(#[from] RepoError),
}

pub type EngagementResult<T> = Result<T, EngagementError>;

fn check_funds(points: i64, price: i64) -> EngagementResult<()> {
    if points >= price {
        return Ok(());
    }
    let shortfall = price - points;
    Err(EngagementError::InsufficientPoints { shortfall, problems_needed: problems_needed(shortfall) })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    Upvoted,
    Removed,
}

/// Upvote state of one problem card as seen by one viewer.
///
/// The counter is moved locally and written back as is; upvotes by other
/// users since [`UpvoteState::load`] are not picked up until the next load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UpvoteState {
    pub problem_id: Id,
    #[serde(skip)]
    viewer: Option<Id>,
    pub upvoted: bool,
    pub count: i64,
}

impl UpvoteState {
    pub async fn load(repo: &dyn Repo, problem: &Problem, viewer: Option<Id>) -> EngagementResult<Self> {
        let upvoted = match viewer {
            Some(user) => repo.find_upvote(problem.id, user).await?.is_some(),
            None => false,
        };
        Ok(Self { problem_id: problem.id, viewer, upvoted, count: problem.upvotes })
    }

    pub async fn toggle(&mut self, repo: &dyn Repo) -> EngagementResult<ToggleOutcome> {
        let Some(user) = self.viewer else { return Err(EngagementError::LoginRequired) };
        let outcome = if self.upvoted {
            repo.delete_upvote(self.problem_id, user).await?;
            self.upvoted = false;
            self.count -= 1;
            ToggleOutcome::Removed
        } else {
            repo.insert_upvote(self.problem_id, user).await?;
            self.upvoted = true;
            self.count += 1;
            ToggleOutcome::Upvoted
        };
        repo.set_problem_upvotes(self.problem_id, self.count).await?;
        debug!(problem = %self.problem_id, %user, count = self.count, ?outcome, "upvote toggled");
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Ledger {
    pub balance: i64,
    pub transactions: Vec<PointTransaction>,
}

/// Balance bookkeeping on top of the append-only ledger.
#[derive(Clone)]
pub struct Points {
    repo: Arc<dyn Repo>,
}

impl Points {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    pub async fn award(&self, user: Id, amount: i64, description: String) -> EngagementResult<PointTransaction> {
        let profile = self.repo.get_profile(user).await?;
        self.repo.set_points(user, profile.points + amount).await?;
        let tx = self
            .repo
            .append_transaction(NewPointTransaction { user_id: user, points: amount, kind: PointKind::Earned, description })
            .await?;
        Ok(tx)
    }

    /// Debits without checking the balance; callers check funds first.
    pub async fn spend(&self, user: Id, amount: i64, description: String) -> EngagementResult<PointTransaction> {
        let profile = self.repo.get_profile(user).await?;
        self.repo.set_points(user, profile.points - amount).await?;
        let tx = self
            .repo
            .append_transaction(NewPointTransaction { user_id: user, points: -amount, kind: PointKind::Spent, description })
            .await?;
        Ok(tx)
    }

    pub async fn ledger(&self, user: Id) -> EngagementResult<Ledger> {
        let profile = self.repo.get_profile(user).await?;
        let mut transactions = self.repo.list_transactions(user).await?;
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Ledger { balance: profile.points, transactions })
    }

    /// Rewrites the balance from the ledger sum. Returns the drift that was
    /// corrected (stored balance minus ledger sum), zero when they agreed.
    pub async fn reconcile(&self, user: Id) -> EngagementResult<i64> {
        let profile = self.repo.get_profile(user).await?;
        let sum: i64 = self.repo.list_transactions(user).await?.iter().map(|t| t.points).sum();
        let drift = profile.points - sum;
        if drift != 0 {
            warn!(%user, stored = profile.points, ledger = sum, drift, "balance drifted from ledger, correcting");
            self.repo.set_points(user, sum).await?;
        }
        Ok(drift)
    }

    /// Reconciles every profile; returns how many were corrected.
    pub async fn reconcile_all(&self) -> EngagementResult<usize> {
        let mut corrected = 0;
        for user in self.repo.list_profile_ids().await? {
            match self.reconcile(user).await {
                Ok(0) => {}
                Ok(_) => corrected += 1,
                Err(e) => warn!(%user, error = %e, "reconcile failed"),
            }
        }
        Ok(corrected)
    }
}

pub const FIRST_PROBLEM_BADGE: &str = "first_problem";

/// Creates the problem, then credits the author. The credit is not atomic
/// with the creation.
pub async fn publish_problem(
    repo: &Arc<dyn Repo>,
    author: Id,
    new: NewProblem,
) -> EngagementResult<(Problem, PointTransaction)> {
    // no profile, nobody to credit
    repo.get_profile(author).await?;
    let problem = repo.create_problem(author, new).await?;
    let points = Points::new(repo.clone());
    let tx = points
        .award(author, POINTS_PER_PROBLEM, format!("Published problem: {}", problem.title))
        .await?;
    info!(problem = %problem.id, %author, "problem published");

    let earned = repo.list_transactions(author).await?.iter().filter(|t| t.kind == PointKind::Earned).count();
    if earned == 1 {
        match repo.award_badge(author, FIRST_PROBLEM_BADGE).await {
            Ok(_) | Err(RepoError::Conflict) => {}
            Err(e) => warn!(%author, error = %e, "failed to award badge"),
        }
    }
    Ok((problem, tx))
}

/// Price of a premium username by length: shorter is rarer.
pub fn alias_price(alias: &str) -> i64 {
    match alias.chars().count() {
        0..=2 => 1000,
        3 => 500,
        4 => 250,
        5 => 100,
        _ => 50,
    }
}

/// Lowercases and validates a requested alias.
pub fn normalize_alias(raw: &str) -> EngagementResult<String> {
    let alias = raw.trim().to_lowercase();
    if alias.is_empty() || alias.chars().count() > ALIAS_MAX_LEN {
        return Err(EngagementError::InvalidAlias(format!("must be 1 to {ALIAS_MAX_LEN} characters")));
    }
    if !alias.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(EngagementError::InvalidAlias("only letters, digits and _ are allowed".into()));
    }
    Ok(alias)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Purchase {
    pub customization: UserCustomization,
    pub transaction: PointTransaction,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AliasPurchase {
    pub alias: UserAlias,
    pub transaction: PointTransaction,
}

/// Customization shop. At most one purchase per user is in flight at a time.
pub struct Shop {
    repo: Arc<dyn Repo>,
    points: Points,
    purchasing: DashSet<Id>,
}

struct InFlight<'a> {
    set: &'a DashSet<Id>,
    user: Id,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.user);
    }
}

impl Shop {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { points: Points::new(repo.clone()), repo, purchasing: DashSet::new() }
    }

    pub fn points(&self) -> &Points {
        &self.points
    }

    pub fn is_purchasing(&self, user: Id) -> bool {
        self.purchasing.contains(&user)
    }

    fn begin(&self, user: Id) -> EngagementResult<InFlight<'_>> {
        if !self.purchasing.insert(user) {
            return Err(EngagementError::PurchaseInFlight);
        }
        Ok(InFlight { set: &self.purchasing, user })
    }

    /// Buys an item: ownership row first, then the debit. Neither step is
    /// rolled back if the next one fails.
    pub async fn purchase(&self, user: Id, item_id: Id) -> EngagementResult<Purchase> {
        let _guard = self.begin(user)?;
        let item = self.repo.get_item(item_id).await?;
        if self.repo.list_owned(user).await?.iter().any(|c| c.item_id == item_id) {
            return Err(EngagementError::AlreadyOwned);
        }
        let profile = self.repo.get_profile(user).await?;
        check_funds(profile.points, item.price)?;

        let customization = match self.repo.insert_purchase(user, item_id).await {
            Err(RepoError::Conflict) => return Err(EngagementError::AlreadyOwned),
            r => r?,
        };
        let transaction = self.points.spend(user, item.price, format!("Purchased {}", item.name)).await?;
        info!(%user, item = %item.id, price = item.price, "item purchased");
        Ok(Purchase { customization, transaction })
    }

    pub async fn purchase_alias(&self, user: Id, raw: &str) -> EngagementResult<AliasPurchase> {
        let alias = normalize_alias(raw)?;
        let _guard = self.begin(user)?;
        if self.repo.find_profile_by_username(&alias).await?.is_some()
            || self.repo.find_alias(&alias).await?.is_some()
        {
            return Err(EngagementError::AliasTaken);
        }
        let price = alias_price(&alias);
        let profile = self.repo.get_profile(user).await?;
        check_funds(profile.points, price)?;

        let row = match self.repo.insert_alias(user, &alias, price).await {
            Err(RepoError::Conflict) => return Err(EngagementError::AliasTaken),
            r => r?,
        };
        let transaction = self.points.spend(user, price, format!("Purchased alias @{alias}")).await?;
        info!(%user, %alias, price, "alias purchased");
        Ok(AliasPurchase { alias: row, transaction })
    }
}
