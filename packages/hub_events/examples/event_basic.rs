//! Basic example of tasks on a hub coordinating through an event.
//!
//! Several workers wait for a "start" event that a coordinator sets after a short delay.

use std::time::Duration;

use hub_events::{Event, Hub};

fn main() {
    println!("=== Hub Events Basic Example ===");

    let hub = Hub::new();
    let start = Event::new();

    for worker in 0..3 {
        hub.spawn({
            let hub = hub.clone();
            let start = start.clone();

            async move {
                println!("Worker {worker} waiting for the start signal...");

                let was_set = start
                    .wait(&hub, None)
                    .await
                    .expect("no deadline governs this task");

                println!("Worker {worker} woke up (event set: {was_set})");
            }
        });
    }

    hub.spawn({
        let hub = hub.clone();
        let start = start.clone();

        async move {
            hub.sleep(Duration::from_millis(50))
                .await
                .expect("no deadline governs this task");

            println!("Coordinator setting the start signal");
            start.set(&hub);
        }
    });

    hub.run();

    println!("Example completed successfully!");
}
