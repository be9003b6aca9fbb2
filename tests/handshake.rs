use std::sync::Arc;
use std::thread;
use std::time::Duration;

use frame_pipeline::checksum::frame_checksum;
use frame_pipeline::config::WordOrder;
use frame_pipeline::handshake::{self, HandshakePeer, SharedWindow};
use frame_pipeline::line::{OutputLine, Wire};
use frame_pipeline::pool::FramePool;
use frame_pipeline::Error;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn requester_and_peer_run_many_cycles() {
    init_logging();
    let (mut link, mut peer) = handshake::pair(WordOrder::BigEndian).unwrap();
    let peer_closer = peer.closer();
    let peer_thread = thread::spawn(move || peer.serve());

    let pool = FramePool::new(1, 32);
    for i in 0..20u8 {
        let mut slot = pool.try_acquire().unwrap().unwrap();
        let data: Vec<u8> = (0..32).map(|b| b ^ i).collect();
        slot.set_payload(&data).unwrap();
        let expected = frame_checksum(&slot, WordOrder::BigEndian);

        let slot = link
            .request_and_await(slot, Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(slot.checksum(), Some(expected));
        pool.release(slot).unwrap();
    }

    peer_closer.close();
    assert_eq!(peer_thread.join().unwrap(), Ok(20));

    let stats = link.stats();
    assert_eq!(stats.requests, 20);
    assert_eq!(stats.acks, 20);
    assert_eq!(stats.violations, 0);
}

#[test]
fn closing_link_aborts_wait() {
    init_logging();
    let (mut link, _peer) = handshake::pair(WordOrder::BigEndian).unwrap();
    let closer = link.closer();
    closer.close();

    let pool = FramePool::new(1, 4);
    let slot = pool.try_acquire().unwrap().unwrap();
    let failed = link.request_and_await(slot, None).unwrap_err();
    assert_eq!(failed.error, Error::Aborted);

    // The frame comes back with the error and can be returned to its pool
    pool.release(failed.slot.unwrap()).unwrap();
    assert_eq!(pool.in_flight(), 0);
}

#[test]
fn abort_during_wait_returns_the_frame() {
    init_logging();
    let (mut link, _peer) = handshake::pair(WordOrder::BigEndian).unwrap();
    let closer = link.closer();
    let aborter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        closer.close();
    });

    let pool = FramePool::new(1, 4);
    let slot = pool.try_acquire().unwrap().unwrap();
    let failed = link.request_and_await(slot, None).unwrap_err();
    aborter.join().unwrap();

    assert_eq!(failed.error, Error::Aborted);
    pool.release(failed.slot.unwrap()).unwrap();
    let stats = pool.stats();
    assert_eq!(stats.acquires, stats.releases);
}

#[cfg(feature = "async")]
mod polling {
    use super::*;
    use async_trait::async_trait;
    use frame_pipeline::handshake::{AsyncDelay, AsyncLines, AsyncRequester};
    use frame_pipeline::line::EdgeInput;

    /// Both lines reached directly, standing in for a bridge
    struct WireLines {
        request: Arc<Wire>,
        ack: Arc<Wire>,
    }

    #[async_trait(?Send)]
    impl AsyncLines for WireLines {
        async fn set_request(&mut self, high: bool) -> frame_pipeline::Result<()> {
            if high {
                self.request.set_high();
            } else {
                self.request.set_low();
            }
            Ok(())
        }

        async fn ack_is_high(&mut self) -> frame_pipeline::Result<bool> {
            Ok(self.ack.is_high())
        }
    }

    struct Sleep;

    impl AsyncDelay for Sleep {
        async fn delay() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn lines() -> (WireLines, Arc<Wire>, Arc<Wire>) {
        let request = Arc::new(Wire::new("request"));
        let ack = Arc::new(Wire::new("ack"));
        let lines = WireLines {
            request: request.clone(),
            ack: ack.clone(),
        };
        (lines, request, ack)
    }

    #[tokio::test]
    async fn polling_requester_with_peer() {
        init_logging();
        let (lines, request, ack) = lines();
        let window = Arc::new(SharedWindow::new());
        let mut peer =
            HandshakePeer::new(ack, request, window.clone(), WordOrder::LittleEndian).unwrap();
        let peer_closer = peer.closer();
        let peer_thread = thread::spawn(move || peer.serve());

        let mut requester: AsyncRequester<_, Sleep> = AsyncRequester::new(lines, 5000);
        let pool = FramePool::new(1, 4);
        for _ in 0..3 {
            let mut slot = pool.try_acquire().unwrap().unwrap();
            slot.set_payload(&[0, 1, 2, 3]).unwrap();
            let slot = requester.request_and_await(&window, slot).await.unwrap();
            assert_eq!(slot.checksum(), Some(0xFBFD));
            pool.release(slot).unwrap();
        }

        peer_closer.close();
        assert_eq!(peer_thread.join().unwrap(), Ok(3));

        let stats = requester.stats();
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.acks, 3);
        assert_eq!(stats.violations, 0);
    }

    #[tokio::test]
    async fn polling_requester_times_out() {
        init_logging();
        let (lines, request, _ack) = lines();
        let window = SharedWindow::new();
        let mut requester: AsyncRequester<_, Sleep> = AsyncRequester::new(lines, 5);

        let pool = FramePool::new(1, 4);
        let slot = pool.try_acquire().unwrap().unwrap();
        let failed = requester.request_and_await(&window, slot).await.unwrap_err();
        assert_eq!(failed.error, Error::Timeout);
        assert!(!request.is_high());
        assert!(!window.is_occupied());

        pool.release(failed.slot.unwrap()).unwrap();
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn polling_requester_waits_for_ack_to_drop() {
        init_logging();
        let (lines, request, ack) = lines();
        ack.set_high();
        let mut requester: AsyncRequester<_, Sleep> = AsyncRequester::new(lines, 5);

        // A peer still holding ack from the last cycle is slow, not faulty
        assert_eq!(requester.cycle().await, Err(Error::Timeout));
        assert!(!request.is_high());
        assert_eq!(requester.stats().violations, 0);
        assert_eq!(requester.stats().requests, 0);
    }
}
