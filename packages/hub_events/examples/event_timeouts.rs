//! Demonstrates timeouts on event waits and how they interact with enclosing deadlines.

use std::time::Duration;

use hub_events::{Event, Hub, timeout};

fn main() {
    println!("=== Hub Events Timeouts Example ===");

    let hub = Hub::new();
    let never_set = Event::new();

    hub.block_on({
        let hub = hub.clone();

        async move {
            // The wait's own timeout is not an error, it just reports that the event is not set.
            let was_set = never_set
                .wait(&hub, Some(Duration::from_millis(20)))
                .await
                .expect("no enclosing deadline governs this wait");
            println!("Wait with its own 20 ms timeout returned: {was_set}");

            // An enclosing deadline that expires first is passed on to its owner.
            let outcome = timeout(&hub, Duration::from_millis(20), async {
                never_set.wait(&hub, Some(Duration::from_secs(60))).await
            })
            .await;

            match outcome {
                Ok(Some(was_set)) => println!("Wait completed in time: {was_set}"),
                Ok(None) => println!("Enclosing 20 ms deadline expired before the wait finished"),
                Err(signal) => println!("Some other deadline interrupted us: {signal}"),
            }
        }
    });

    println!("Example completed successfully!");
}
