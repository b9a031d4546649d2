use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::{Buffer, ShmemConfig};
use crate::errors::SpaceError;
use crate::tuple::{Tuple, Value};

use super::unique_config;

const PATIENCE: Duration = Duration::from_secs(10);

fn int(i: i32) -> Tuple {
    Tuple::new(vec![Value::Integer(i)])
}

fn id_of(tuple: &Tuple) -> i32 {
    match tuple.values() {
        [Value::Integer(id)] => *id,
        other => panic!("unexpected tuple {:?}", other),
    }
}

#[test]
fn blocked_consumer_wakes_on_output() -> Result<(), Box<dyn Error>> {
    let cfg = unique_config(4);
    let buffer = Buffer::init(&cfg)?;

    let consumer = {
        let cfg = cfg.clone();
        thread::spawn(move || -> Result<(Tuple, Duration), SpaceError> {
            let handle = Buffer::attach(&cfg)?;
            let started = Instant::now();
            let tuple = handle.input("integer:42", PATIENCE)?;
            Ok((tuple, started.elapsed()))
        })
    };
    thread::sleep(Duration::from_millis(100));
    buffer.output(&int(42))?;

    let (tuple, waited) = consumer.join().expect("consumer panicked")?;
    assert_eq!(tuple, int(42));
    assert!(waited < PATIENCE);
    assert!(buffer.dump_list()?.is_empty());
    buffer.destroy()?;
    Ok(())
}

#[test]
fn waiter_at_tail_sees_later_match() -> Result<(), Box<dyn Error>> {
    let cfg = unique_config(8);
    let buffer = Buffer::init(&cfg)?;
    for i in 0..3 {
        buffer.output(&int(i))?;
    }

    let consumer = {
        let cfg = cfg.clone();
        thread::spawn(move || -> Result<Tuple, SpaceError> {
            Buffer::attach(&cfg)?.input("integer:>=100", PATIENCE)
        })
    };
    thread::sleep(Duration::from_millis(100));
    // Pull the tail out from under the waiter before the match arrives.
    buffer.input("integer:2", Duration::ZERO)?;
    buffer.output(&int(3))?;
    buffer.output(&int(100))?;

    assert_eq!(consumer.join().expect("consumer panicked")?, int(100));
    let left: Vec<_> = buffer
        .dump_list()?
        .into_iter()
        .filter_map(|report| report.tuple)
        .collect();
    assert_eq!(left, vec![int(0), int(1), int(3)]);
    buffer.destroy()?;
    Ok(())
}

#[test]
fn each_tuple_taken_once() -> Result<(), Box<dyn Error>> {
    let cfg = unique_config(4);
    let buffer = Buffer::init(&cfg)?;
    buffer.output(&int(1))?;

    let barrier = Arc::new(Barrier::new(2));
    let takers: Vec<_> = (0..2)
        .map(|_| {
            let cfg = cfg.clone();
            let barrier = barrier.clone();
            thread::spawn(move || -> Result<Option<Tuple>, SpaceError> {
                let handle = Buffer::attach(&cfg)?;
                barrier.wait();
                match handle.input("integer:1", Duration::from_millis(200)) {
                    Ok(tuple) => Ok(Some(tuple)),
                    Err(SpaceError::Timeout) => Ok(None),
                    Err(e) => Err(e),
                }
            })
        })
        .collect();

    let mut winners = 0;
    for taker in takers {
        if taker.join().expect("taker panicked")?.is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    buffer.destroy()?;
    Ok(())
}

fn produce(cfg: &ShmemConfig, ids: impl Iterator<Item = i32>) -> Result<(), SpaceError> {
    let handle = Buffer::attach(cfg)?;
    for id in ids {
        // The space is smaller than the workload; back off while it is full.
        loop {
            match handle.output(&int(id)) {
                Ok(_) => break,
                Err(SpaceError::OutOfMemory) => thread::yield_now(),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

#[test]
fn producers_and_consumers_exchange_exactly_once() -> Result<(), Box<dyn Error>> {
    const PRODUCERS: i32 = 3;
    const CONSUMERS: usize = 3;
    const PER_PRODUCER: i32 = 200;

    let cfg = unique_config(16);
    let buffer = Buffer::init(&cfg)?;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(AtomicBool::new(false));

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let cfg = cfg.clone();
            let seen = seen.clone();
            let done = done.clone();
            thread::spawn(move || -> Result<(), SpaceError> {
                let handle = Buffer::attach(&cfg)?;
                loop {
                    match handle.input("integer:*", Duration::from_millis(50)) {
                        Ok(tuple) => seen.lock().unwrap().push(id_of(&tuple)),
                        Err(SpaceError::Timeout) if done.load(Ordering::SeqCst) => return Ok(()),
                        Err(SpaceError::Timeout) => {}
                        Err(e) => return Err(e),
                    }
                }
            })
        })
        .collect();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let cfg = cfg.clone();
            thread::spawn(move || produce(&cfg, p * PER_PRODUCER..(p + 1) * PER_PRODUCER))
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer panicked")?;
    }
    done.store(true, Ordering::SeqCst);
    for consumer in consumers {
        consumer.join().expect("consumer panicked")?;
    }

    let seen = seen.lock().unwrap();
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(seen.len(), (PRODUCERS * PER_PRODUCER) as usize, "duplicates delivered");
    assert_eq!(unique, (0..PRODUCERS * PER_PRODUCER).collect::<HashSet<_>>());
    assert!(buffer.dump_list()?.is_empty());
    assert_eq!(buffer.dump_slots()?.iter().filter(|r| r.tuple.is_some()).count(), 0);
    buffer.destroy()?;
    Ok(())
}

#[test]
fn concurrent_readers_leave_list_intact() -> Result<(), Box<dyn Error>> {
    let cfg = unique_config(8);
    let buffer = Buffer::init(&cfg)?;
    for i in 0..8 {
        buffer.output(&int(i))?;
    }

    let readers: Vec<_> = (0..4)
        .map(|r| {
            let cfg = cfg.clone();
            thread::spawn(move || -> Result<(), SpaceError> {
                let handle = Buffer::attach(&cfg)?;
                for round in 0..50 {
                    let wanted = (r + round) % 8;
                    let tuple = handle.read(&format!("integer:{}", wanted), Duration::ZERO)?;
                    assert_eq!(id_of(&tuple), wanted);
                }
                Ok(())
            })
        })
        .collect();
    for reader in readers {
        reader.join().expect("reader panicked")?;
    }
    assert_eq!(buffer.dump_list()?.len(), 8);
    buffer.destroy()?;
    Ok(())
}
