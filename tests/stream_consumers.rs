use mudtap::stream::{LineBuffer, StreamBuffer, StreamMask};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn thread_consumers_each_see_every_line_in_order() {
    let buffer = Arc::new(LineBuffer::with_poll_interval(1000, Duration::from_millis(2)));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let buffer = Arc::clone(&buffer);
            let consumer = buffer.subscribe();
            thread::spawn(move || {
                (0..200)
                    .map(|_| buffer.read_blocking(&consumer).text().to_string())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for i in 0..200 {
        buffer.append(format!("line {i}"));
        if i % 50 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    let expected: Vec<_> = (0..200).map(|i| format!("line {i}")).collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn task_consumers_receive_their_channels_only() {
    let buffer = Arc::new(StreamBuffer::new(1000));
    let mut tasks = Vec::new();
    for mask in [
        StreamMask::DOWNSTREAM_STRIPPED,
        StreamMask::SCRIPT_OUTPUT,
        StreamMask::DOWNSTREAM_STRIPPED | StreamMask::SCRIPT_OUTPUT,
    ] {
        let buffer = Arc::clone(&buffer);
        let consumer = buffer.subscribe_to(mask).unwrap();
        let wanted = if mask.contains(StreamMask::DOWNSTREAM_STRIPPED | StreamMask::SCRIPT_OUTPUT) {
            100
        } else {
            50
        };
        tasks.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..wanted {
                seen.push(buffer.read(&consumer).await.text().to_string());
            }
            (mask, seen)
        }));
    }

    for i in 0..100 {
        let mask = if i % 2 == 0 {
            StreamMask::DOWNSTREAM_STRIPPED
        } else {
            StreamMask::SCRIPT_OUTPUT
        };
        buffer.push(i.to_string(), mask);
        if i % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }

    for task in tasks {
        let (mask, seen) = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        let expected: Vec<_> = (0..100)
            .filter(|i| {
                let record_mask = if i % 2 == 0 {
                    StreamMask::DOWNSTREAM_STRIPPED
                } else {
                    StreamMask::SCRIPT_OUTPUT
                };
                record_mask.intersects(mask)
            })
            .map(|i| i.to_string())
            .collect();
        assert_eq!(seen, expected, "mask {mask}");
    }
}

#[test]
fn finished_consumers_are_reaped() {
    let buffer = Arc::new(StreamBuffer::default());
    let survivor = buffer.subscribe();
    let workers: Vec<_> = (0..3)
        .map(|_| {
            let buffer = Arc::clone(&buffer);
            let consumer = buffer.subscribe();
            thread::spawn(move || buffer.drain(&consumer).len())
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(buffer.stats().consumers, 4);
    assert_eq!(buffer.reap(), 3);
    assert_eq!(buffer.stats().consumers, 1);
    buffer.push("still here", StreamMask::DOWNSTREAM_STRIPPED);
    assert_eq!(buffer.try_read(&survivor).unwrap().text(), "still here");
}

#[test]
fn slow_consumer_loses_only_evicted_history() {
    let buffer = StreamBuffer::new(5);
    let slow = buffer.subscribe();
    for i in 0..12 {
        buffer.push(i.to_string(), StreamMask::DOWNSTREAM_STRIPPED);
    }
    let stats = buffer.stats();
    assert_eq!(stats.buffered, 5);
    assert_eq!(stats.base_offset, 7);

    let texts: Vec<_> = buffer
        .drain(&slow)
        .iter()
        .map(|record| record.text().to_string())
        .collect();
    assert_eq!(texts, vec!["7", "8", "9", "10", "11"]);
}
