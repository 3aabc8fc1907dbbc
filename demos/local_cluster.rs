use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use env_logger;
use log;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use net_sort::{ExchangeBuilder, MeshListener, Record, RecordSorter, RetryPolicy, ServerConfig, ServerConfigs};

const NODES: usize = 4;
const RECORDS_PER_NODE: usize = 10_000;

fn generate_shard(seed: u64) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    Vec::from_iter((0..RECORDS_PER_NODE).map(|_| {
        let mut key = [0u8; 10];
        let mut value = [0u8; 90];
        rng.fill(&mut key[..]);
        rng.fill(&mut value[..]);
        Record::new(key, value)
    }))
}

fn main() {
    env_logger::Builder::new().filter_level(log::LevelFilter::Info).init();

    let listeners = Vec::from_iter((0..NODES).map(|_| TcpListener::bind("127.0.0.1:0").unwrap()));
    let configs = ServerConfigs {
        servers: Vec::from_iter(listeners.iter().enumerate().map(|(id, listener)| ServerConfig {
            server_id: id,
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port().to_string(),
        })),
    };

    let nodes = Vec::from_iter(listeners.into_iter().enumerate().map(|(id, listener)| {
        let exchange = ExchangeBuilder::new(configs.clone(), id)
            .with_retry_policy(RetryPolicy::unbounded(Duration::from_millis(100)))
            .build()
            .unwrap();
        let shard = generate_shard(id as u64);

        thread::spawn(move || {
            let owned = exchange
                .run_with_listener(MeshListener::from_listener(listener), shard)
                .unwrap();
            RecordSorter::new(Some(2)).unwrap().sort(owned)
        })
    }));

    let outputs = Vec::from_iter(nodes.into_iter().map(|node| node.join().unwrap()));
    for (id, output) in outputs.iter().enumerate() {
        println!("server {}: {} records", id, output.len());
    }

    let all = Vec::from_iter(outputs.into_iter().flatten());
    assert_eq!(all.len(), NODES * RECORDS_PER_NODE);
    assert!(all.windows(2).all(|w| w[0].key() <= w[1].key()));
    println!("{} records globally sorted", all.len());
}
