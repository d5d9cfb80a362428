use std::future::Future;
use futures::future::join_all;
use crate::device::DeviceClient;

/// Dispatch `op` to every device at once and wait for all of them.
///
/// There is no short-circuit: a failing device never cancels the others, and
/// the results come back in device order.
pub async fn join_devices<'a, F, Fut, T>(devices: &'a mut [DeviceClient], op: F) -> Vec<T>
where
    F: FnMut(&'a mut DeviceClient) -> Fut,
    Fut: Future<Output = T> + 'a,
{
    join_all(devices.iter_mut().map(op)).await
}
