use scopeline::{Grammar, Registry};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = Registry::new();
    registry.register(
        Grammar::from_json(include_str!("../src/fixtures/comments.json"))?,
        None,
    )?;

    let mut tokenizer = registry.tokenizer("source.comments")?;
    let mut stack = tokenizer.initial_stack();
    for line in ["x = 'hello' /* a", "comment */ 42"] {
        let res = tokenizer.tokenize_line(line, stack);
        for token in &res.tokens {
            let scopes: Vec<_> = token.scopes.iter().map(|s| s.to_string()).collect();
            println!("{:?} {}", &line[token.span.clone()], scopes.join(" "));
        }
        // the stack is all that is needed to carry on with the next line
        stack = res.stack;
    }

    Ok(())
}
