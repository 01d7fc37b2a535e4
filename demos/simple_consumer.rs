use std::time::Duration;

use futures::{pin_mut, StreamExt};
use kafkas_consumer::{
    consumer::{CommitMode, Consumer, ConsumerOptions},
    message::{RawMessage, Timestamp},
    metadata::TopicPartitionList,
    rebalance::Rebalance,
    testing::MockBroker,
    Error, ErrorCode,
};

fn scripted_broker() -> MockBroker {
    let broker = MockBroker::new();

    let mut partitions = TopicPartitionList::new();
    partitions.add_partition("kafka", 0);
    partitions.add_partition("kafka", 1);
    broker.push_rebalance(Rebalance::Assign(partitions));

    let now = chrono::Utc::now().timestamp_millis();
    broker.push_messages((0..7).map(|offset| {
        RawMessage::new("kafka", (offset % 2) as i32, offset / 2)
            .with_key(format!("key-{offset}"))
            .with_payload(format!("hello kafka {offset}"))
            .with_timestamp(Timestamp::CreateTime(now - 25))
    }));
    broker.push_error(ErrorCode::Transport, "connection reset by peer");
    broker
}

#[tokio::main]
async fn main() -> Result<(), Box<Error>> {
    tracing_subscriber::fmt()
        // Configure formatting settings.
        .with_target(true)
        .with_level(true)
        .with_max_level(tracing::Level::INFO)
        .with_ansi(true)
        .with_file(true)
        .with_line_number(true)
        // Set the subscriber as the default.
        .init();

    let broker = scripted_broker();

    let mut consumer_options = ConsumerOptions::new("app");
    consumer_options
        .component_name("simple-consumer")
        .topics(["kafka"])
        .max_batch_size(3)
        .max_poll_time(Duration::from_millis(500))
        .commit_mode(CommitMode::ManualSync);

    let mut consumer = Consumer::new(broker, consumer_options)?;
    consumer.start().await?;

    let stats = consumer.stats();
    let max_batch_size = consumer.options().max_batch_size;
    {
        let consume_stream = consumer.stream(max_batch_size).take(3);
        pin_mut!(consume_stream);

        while let Some(batch) = consume_stream.next().await {
            for message in &batch {
                println!(
                    "{:?} - {}",
                    String::from_utf8_lossy(message.payload()),
                    message.offset()
                );
            }
            stats.account_message_batch_processing_succeeded(&batch);
        }
    }

    consumer.commit().await?;
    consumer.leave_group().await;

    println!("{:#?}", consumer.get_stats().snapshot());
    Ok(())
}
