//! Background drift: advances the fleet once per period so REST reads and
//! feed frames always see moving values.

use crate::state::SimState;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub fn spawn_drift(state: SimState) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(state.feed_period).await;
            state.fleet.write().await.advance();
        }
    })
}
