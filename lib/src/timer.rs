// Copyright (c) 2022-2023 The MobileCoin Foundation

use tokio::time::Instant;

/// Sleep until the provided deadline, or forever if there is none
///
/// Used as a `select!` branch so timers run on the owning actor's loop.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}
