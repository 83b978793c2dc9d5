use kb_chat_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    kb_chat_stream::observability::init_observability();
    let client = ChatClient::from_env()?;

    let output = client
        .chat(ChatRequest::new("demo-user", ["kb-handbook"], "How do I file expenses?"))
        .on_event(|event| match event {
            StreamEvent::Answer { text } | StreamEvent::FastAnswer { text } => print!("{text}"),
            StreamEvent::ToolCall { payload } => eprintln!("\n[tool call] {payload}"),
            StreamEvent::FlowNodeStatus { payload } => eprintln!("[node] {payload}"),
            _ => {}
        })
        .run()
        .await?;

    println!();
    for quote in output.quotes() {
        println!("[{}] {}", quote.source_name, quote.a);
    }
    Ok(())
}
