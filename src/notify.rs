use sqlx::postgres::PgListener;

/// Spawns a dedicated LISTEN/NOTIFY task: one connection held outside the bounded pool,
/// `LISTEN`-ing on every configured channel, logging each notification as it arrives. A no-op
/// when `channels` is empty, so a config that never sets notify channels pays for no extra
/// connection.
pub async fn spawn(
    db_conn_string: &str,
    channels: Vec<String>,
) -> Result<Option<tokio::task::JoinHandle<()>>, sqlx::Error> {
    if channels.is_empty() {
        return Ok(None);
    }

    let mut listener = PgListener::connect(db_conn_string).await?;
    for channel in &channels {
        listener.listen(channel).await?;
    }
    tracing::info!(channels = %channels.join(", "), "listening for notifications");

    let handle = tokio::spawn(async move {
        loop {
            match listener.recv().await {
                Ok(notification) => {
                    tracing::info!(
                        channel = notification.channel(),
                        payload = notification.payload(),
                        "received notification"
                    );
                    // TODO enqueue notification payload once a consumer exists
                }
                Err(e) => {
                    tracing::error!(error = %e, "notification listener error");
                }
            }
        }
    });

    Ok(Some(handle))
}
