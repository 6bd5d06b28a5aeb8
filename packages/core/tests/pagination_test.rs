//! Toolkit pagination and caching scenarios, including the token-budget
//! trimming behavior over a 23-document sequence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use pagecore::models::{FieldSpec, FieldType, Page, PageType, PageURI};
use pagecore::toolkit::{ToolArgs, ToolOptions, ToolOutput, ToolResultKind, Toolkit};

fn doc_pages(count: usize, tokens: u32) -> Vec<Page> {
    let descriptor = PageType::builder("doc")
        .field(FieldSpec::required("title", FieldType::String))
        .build()
        .unwrap();
    (0..count)
        .map(|i| {
            Page::builder(
                descriptor.clone(),
                PageURI::parse(&format!("r/doc:item-{}@1", i)).unwrap(),
            )
            .field("title", format!("doc {}", i))
            .token_count(tokens)
            .build()
            .unwrap()
        })
        .collect()
}

fn toolkit_with_listing(count: usize, options: ToolOptions) -> (Toolkit, Arc<AtomicU32>) {
    let toolkit = Toolkit::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    toolkit
        .register_tool(
            "list_docs",
            "List documents",
            ToolResultKind::PageSequence,
            options,
            move |_args: ToolArgs| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ToolOutput::Pages(doc_pages(count, 100)))
                }
            },
        )
        .unwrap();
    (toolkit, calls)
}

#[tokio::test]
async fn token_budget_trims_each_page_slice() {
    // 23 documents of 100 tokens each; page size 10; budget 250
    let (toolkit, _calls) = toolkit_with_listing(
        23,
        ToolOptions::new().with_pagination(10).with_token_budget(250),
    );

    let mut args = ToolArgs::new();
    args.insert("page".to_string(), json!(0));
    let first = toolkit.invoke("list_docs", args).await.unwrap();
    // 100 + 100 fits the budget, the third document would overflow
    assert_eq!(first["documents"].as_array().unwrap().len(), 2);
    assert_eq!(first["page_number"], 0);
    assert_eq!(first["has_next_page"], true);
    assert_eq!(first["total_documents"], 23);
    assert_eq!(first["token_count"], 200);

    let mut args = ToolArgs::new();
    args.insert("page".to_string(), json!(2));
    let third = toolkit.invoke("list_docs", args).await.unwrap();
    // Slice starts at index 20; accumulated tokens 100, 200, then 300
    // overflows: cut at 200 and return two documents
    let documents = third["documents"].as_array().unwrap();
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0]["uri"], "r/doc:item-20@1");
    assert_eq!(documents[1]["uri"], "r/doc:item-21@1");
    assert_eq!(third["token_count"], 200);
    // Document 22 was never returned, so a next page still exists
    assert_eq!(third["has_next_page"], true);
}

#[tokio::test]
async fn oversized_first_document_is_still_returned() {
    let toolkit = Toolkit::new();
    toolkit
        .register_tool(
            "list_docs",
            "List documents",
            ToolResultKind::PageSequence,
            ToolOptions::new().with_pagination(5).with_token_budget(50),
            |_args: ToolArgs| async move { Ok(ToolOutput::Pages(doc_pages(3, 400))) },
        )
        .unwrap();

    let response = toolkit.invoke("list_docs", ToolArgs::new()).await.unwrap();
    assert_eq!(response["documents"].as_array().unwrap().len(), 1);
    assert_eq!(response["token_count"], 400);
    assert_eq!(response["has_next_page"], true);
}

#[tokio::test]
async fn pagination_without_budget_slices_plainly() {
    let (toolkit, _calls) = toolkit_with_listing(23, ToolOptions::new().with_pagination(10));

    let mut args = ToolArgs::new();
    args.insert("page".to_string(), json!(2));
    let last = toolkit.invoke("list_docs", args).await.unwrap();
    assert_eq!(last["documents"].as_array().unwrap().len(), 3);
    assert_eq!(last["has_next_page"], false);
    assert!(last.get("next_cursor").is_none());
}

#[tokio::test]
async fn cursor_points_at_next_page() {
    let (toolkit, _calls) = toolkit_with_listing(23, ToolOptions::new().with_pagination(10));

    let response = toolkit.invoke("list_docs", ToolArgs::new()).await.unwrap();
    assert_eq!(response["has_next_page"], true);
    let cursor = response["next_cursor"].as_str().unwrap();

    // The cursor feeds straight back in as the page argument
    let mut args = ToolArgs::new();
    args.insert("page".to_string(), json!(cursor.parse::<u64>().unwrap()));
    let next = toolkit.invoke("list_docs", args).await.unwrap();
    assert_eq!(next["page_number"], 1);
}

#[tokio::test]
async fn cached_listing_is_shared_across_pages() {
    let (toolkit, calls) = toolkit_with_listing(
        23,
        ToolOptions::new()
            .with_ttl(Duration::from_secs(60))
            .with_pagination(10),
    );

    for page in 0..3 {
        let mut args = ToolArgs::new();
        args.insert("page".to_string(), json!(page));
        toolkit.invoke("list_docs", args).await.unwrap();
    }

    assert_eq!(
        calls.load(Ordering::SeqCst),
        1,
        "one inner computation serves every page"
    );
}

#[tokio::test]
async fn expired_cache_recomputes() {
    let (toolkit, calls) = toolkit_with_listing(
        5,
        ToolOptions::new()
            .with_ttl(Duration::from_millis(20))
            .with_pagination(10),
    );

    toolkit.invoke("list_docs", ToolArgs::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    toolkit.invoke("list_docs", ToolArgs::new()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
