//! Mock GATT transport for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::traits::{Attribute, GattTransport, NotifyCallback, TransportError};
use crate::protocol::constants::SEQUENCE_LAST;

/// A write captured by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub attribute: Attribute,
    pub data: Vec<u8>,
    pub with_response: bool,
}

/// Mock transport for unit testing state machine logic.
///
/// Notifications are scripted per attribute as batches. One batch is
/// delivered, from inside `write`, each time a request completes: a command
/// write, or a firmware chunk carrying the last-chunk marker.
pub struct MockTransport {
    /// Queued notification batches, per attribute.
    responses: Arc<Mutex<HashMap<Attribute, VecDeque<Vec<Vec<u8>>>>>>,
    /// Registered notification handlers.
    callbacks: Arc<Mutex<HashMap<Attribute, Arc<NotifyCallback>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<WriteRecord>>>,
    unit_size: usize,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Fail writes after this many have succeeded.
    fail_after: Arc<Mutex<Option<usize>>>,
    /// Drop the link instead of answering the next completed sector.
    drop_on_sector: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_unit_size(23)
    }

    pub fn with_unit_size(unit_size: usize) -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            unit_size,
            connected: Arc::new(Mutex::new(true)),
            fail_after: Arc::new(Mutex::new(None)),
            drop_on_sector: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue one notification for the next command write.
    pub fn queue_command_response(&self, frame: &[u8]) {
        self.queue_batch(Attribute::Command, vec![frame.to_vec()]);
    }

    /// Queue one notification for the next completed sector.
    pub fn queue_sector_response(&self, frame: &[u8]) {
        self.queue_batch(Attribute::Firmware, vec![frame.to_vec()]);
    }

    /// Queue several notifications delivered together after one request.
    pub fn queue_batch(&self, attribute: Attribute, frames: Vec<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .entry(attribute)
            .or_default()
            .push_back(frames);
    }

    /// Push a notification immediately, outside the request/response script.
    pub fn notify(&self, attribute: Attribute, data: &[u8]) {
        let callback = self.callbacks.lock().unwrap().get(&attribute).cloned();
        if let Some(cb) = callback {
            cb(data);
        }
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<WriteRecord> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes to one attribute.
    pub fn writes_to(&self, attribute: Attribute) -> Vec<Vec<u8>> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.attribute == attribute)
            .map(|w| w.data.clone())
            .collect()
    }

    /// Sector tags of every completed sector upload, in order.
    pub fn sector_tags_sent(&self) -> Vec<u16> {
        self.writes_to(Attribute::Firmware)
            .iter()
            .filter(|w| w.len() >= 3 && w[2] == SEQUENCE_LAST)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .collect()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Make every write after the first `count` fail with `Disconnected`.
    pub fn fail_writes_after(&self, count: usize) {
        *self.fail_after.lock().unwrap() = Some(count);
    }

    /// On the next sector's last chunk, accept the write, then disconnect
    /// and drop every handler instead of replying.
    pub fn drop_link_on_next_sector(&self) {
        *self.drop_on_sector.lock().unwrap() = true;
    }

    fn completes_request(attribute: Attribute, data: &[u8]) -> bool {
        match attribute {
            Attribute::Command => true,
            Attribute::Firmware => data.len() >= 3 && data[2] == SEQUENCE_LAST,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl GattTransport for MockTransport {
    fn write(
        &self,
        attribute: Attribute,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        {
            let mut log = self.write_log.lock().unwrap();
            if let Some(limit) = *self.fail_after.lock().unwrap()
                && log.len() >= limit
            {
                drop(log);
                self.disconnect()?;
                return Err(TransportError::Disconnected);
            }
            log.push(WriteRecord {
                attribute,
                data: data.to_vec(),
                with_response,
            });
        }

        if Self::completes_request(attribute, data) {
            if attribute == Attribute::Firmware
                && std::mem::take(&mut *self.drop_on_sector.lock().unwrap())
            {
                return self.disconnect();
            }
            let batch = self
                .responses
                .lock()
                .unwrap()
                .get_mut(&attribute)
                .and_then(|q| q.pop_front());
            if let Some(frames) = batch {
                for frame in frames {
                    self.notify(attribute, &frame);
                }
            }
        }
        Ok(())
    }

    fn subscribe(
        &self,
        attribute: Attribute,
        callback: NotifyCallback,
    ) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.callbacks
            .lock()
            .unwrap()
            .insert(attribute, Arc::new(callback));
        Ok(())
    }

    fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// Simulate device disconnect: handlers are dropped.
    fn disconnect(&self) -> Result<(), TransportError> {
        *self.connected.lock().unwrap() = false;
        self.callbacks.lock().unwrap().clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recorder() -> (NotifyCallback, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        (Box::new(move |data: &[u8]| tx.send(data.to_vec()).unwrap()), rx)
    }

    #[test]
    fn test_mock_response_on_command_write() {
        let mock = MockTransport::new();
        let (cb, rx) = recorder();
        mock.subscribe(Attribute::Command, cb).unwrap();
        mock.queue_command_response(b"ack-1");

        mock.write(Attribute::Command, b"start", true).unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"ack-1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_mock_waits_for_last_chunk() {
        let mock = MockTransport::new();
        let (cb, rx) = recorder();
        mock.subscribe(Attribute::Firmware, cb).unwrap();
        mock.queue_sector_response(b"sector-ack");

        mock.write(Attribute::Firmware, &[0, 0, 0, 1, 2], false).unwrap();
        assert!(rx.try_recv().is_err());

        mock.write(Attribute::Firmware, &[0, 0, 0xFF, 3], false).unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"sector-ack");
        assert_eq!(mock.sector_tags_sent(), vec![0]);
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.write(Attribute::Command, b"Hello", true).unwrap();
        mock.write(Attribute::Firmware, b"World", false).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].data, b"Hello");
        assert!(writes[0].with_response);
        assert_eq!(writes[1].attribute, Attribute::Firmware);
        assert!(!writes[1].with_response);

        mock.clear_writes();
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect().unwrap();
        assert!(!mock.is_connected());
        assert!(mock.write(Attribute::Command, b"test", true).is_err());
    }

    #[test]
    fn test_mock_drops_link_after_last_chunk() {
        let mock = MockTransport::new();
        let (cb, rx) = recorder();
        mock.subscribe(Attribute::Firmware, cb).unwrap();
        mock.queue_sector_response(b"never-sent");
        mock.drop_link_on_next_sector();

        mock.write(Attribute::Firmware, &[0, 0, 0, 1], false).unwrap();
        assert!(mock.is_connected());

        mock.write(Attribute::Firmware, &[0, 0, 0xFF, 2], false).unwrap();
        assert!(!mock.is_connected());
        // Handler dropped with its sender, so the channel reports hang-up.
        assert!(rx.recv().is_err());
        assert_eq!(mock.sector_tags_sent(), vec![0]);
    }

    #[test]
    fn test_mock_fail_after() {
        let mock = MockTransport::new();
        mock.fail_writes_after(1);
        assert!(mock.write(Attribute::Command, b"a", true).is_ok());
        assert!(matches!(
            mock.write(Attribute::Command, b"b", true),
            Err(TransportError::Disconnected)
        ));
        assert!(!mock.is_connected());
    }
}
