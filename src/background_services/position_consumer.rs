//! Responsible for feeding position fixes from the channel to the alert engine
use crate::{
    background_services::geofence_alerts::{Evaluation, GeofenceAlertEngine},
    model::position::Position,
};
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info};

/// Evaluates positions until every sender is gone. When fixes queue up only
/// the newest one is evaluated.
pub async fn consume_positions(receiver: &mut Receiver<Position>, engine: &GeofenceAlertEngine) {
    let mut buffer: Vec<Position> = vec![];

    while receiver.recv_many(&mut buffer, 32).await != 0 {
        let Some(position) = buffer.drain(..).last() else {
            continue;
        };

        match engine.evaluate(&position) {
            Evaluation::Unchanged => {}
            evaluation => debug!("Position {:?} -> {:?}", position.coordinate, evaluation),
        }
    }

    info!("Channel closed");
}
