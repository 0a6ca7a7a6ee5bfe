//! Page-addressed channel layered on the generic transport.
//!
//! Many logical pages (tabs, popups, the background context) share one
//! physical channel. Outbound page messages are rewritten into tagged
//! envelopes stamped with the local page identity; the background side
//! ([`Messenger::init_server`]) relays each envelope to its physical
//! destination with the tag removed. Inbound delivery is restricted to
//! messages addressed back to the receiving page's own identity, which is
//! what makes per-page request/response patterns safe on a shared channel.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{Listener, Messenger};
use crate::envelope::{self, PageInfo};
use crate::error::{Error, Result};
use crate::host::{MessageAdapter, MessageSender};
use crate::registry::{ListenerKey, ScopeKey};

impl Messenger {
    /// Resolve and cache this context's page identity.
    ///
    /// Broadcasts the reserved handshake request; the answering side
    /// ([`init_server`](Self::init_server)) derives the identity from the
    /// sender's owning tab. Concurrent and repeat calls perform the
    /// handshake once and share the stored result.
    pub async fn init_client(&self) -> Result<PageInfo> {
        let info = self
            .page
            .get_or_try_init(|| async {
                let response = self
                    .transport
                    .broadcast(json!({ "type": envelope::PAGE_INFO_TYPE }))
                    .await?;
                let info: PageInfo = serde_json::from_value(response)?;
                debug!(page_id = ?info.page_id, "page identity resolved");
                Ok::<_, Error>(info)
            })
            .await?;
        Ok(info.clone())
    }

    /// The identity resolved by [`init_client`](Self::init_client), if the
    /// handshake has completed.
    pub fn page_info(&self) -> Option<&PageInfo> {
        self.page.get()
    }

    /// Answer identity handshakes and relay page-scoped envelopes to their
    /// physical destination.
    ///
    /// Run once, in the context that owns message delivery (the
    /// background/service context). Repeat calls are no-ops. Senders with
    /// an owning tab get their envelopes relayed back to that tab;
    /// everything else goes out as a runtime broadcast, which covers
    /// non-tab contexts like the popup.
    pub fn init_server(&self) {
        let transport = Arc::clone(&self.transport);
        let adapter: MessageAdapter = Arc::new(
            move |msg: Value, sender: MessageSender| -> BoxFuture<'static, Option<Value>> {
                let transport = Arc::clone(&transport);
                Box::pin(async move {
                    match envelope::topic_of(&msg) {
                        Some(envelope::PAGE_INFO_TYPE) => {
                            let info = match &sender.tab {
                                Some(tab) => PageInfo::from_tab(tab),
                                None => PageInfo::popup(),
                            };
                            Some(serde_json::to_value(info).unwrap_or(Value::Null))
                        }
                        Some(topic) if envelope::untag_type(topic).is_some() => {
                            let forward = envelope::untag_envelope(&msg);
                            let outcome = match &sender.tab {
                                Some(tab) => transport.send_to_tab(tab.id, forward).await,
                                None => transport.broadcast(forward).await,
                            };
                            if let Err(err) = outcome {
                                warn!(%err, "failed to relay page-scoped message");
                            }
                            None
                        }
                        _ => None,
                    }
                })
            },
        );
        if self.relay.set(adapter.clone()).is_ok() {
            self.transport.add_listener(adapter);
        }
    }

    /// Broadcast a page-scoped message.
    ///
    /// The payload must carry a string `type`; it is rewritten into the
    /// tagged envelope form and stamped with this page's identity, so the
    /// relay can address it back here.
    pub async fn page_send(&self, msg: Value) -> Result<Value> {
        let own = self.page.get().ok_or(Error::PageNotInitialised)?;
        let logical = envelope::topic_of(&msg)
            .ok_or(Error::MissingType)?
            .to_owned();
        let mut fields = match msg {
            Value::Object(fields) => fields,
            _ => return Err(Error::MissingType),
        };
        fields.insert(
            "type".to_owned(),
            Value::String(envelope::tag_type(&logical)),
        );
        fields.insert(
            envelope::PAGE_ID_FIELD.to_owned(),
            serde_json::to_value(&own.page_id)?,
        );
        self.transport.broadcast(Value::Object(fields)).await
    }

    /// Register `callback` for every message addressed back to this page.
    pub fn add_page_listener(&self, callback: Listener) {
        self.register_page(ScopeKey::All, callback);
    }

    /// Register `callback` for messages of type `topic` addressed back to
    /// this page.
    pub fn add_page_topic_listener(&self, topic: impl Into<String>, callback: Listener) {
        self.register_page(ScopeKey::Topic(topic.into()), callback);
    }

    /// Drop the match-all page registration of `callback`, if any.
    pub fn remove_page_listener(&self, callback: &Listener) {
        self.unregister_page(&ScopeKey::All, callback);
    }

    /// Drop the `topic` page registration of `callback`, if any.
    pub fn remove_page_topic_listener(&self, topic: &str, callback: &Listener) {
        self.unregister_page(&ScopeKey::Topic(topic.to_owned()), callback);
    }

    /// Drop every page registration of `callback`.
    pub fn remove_all_page_listeners(&self, callback: &Listener) {
        self.page_listeners
            .unregister_all(ListenerKey::of(callback), |adapter| {
                self.transport.remove_listener(adapter)
            });
    }

    fn register_page(&self, scope: ScopeKey, callback: Listener) {
        let key = ListenerKey::of(&callback);
        let adapter_scope = scope.clone();
        let cell = Arc::clone(&self.page);
        self.page_listeners.register(
            key,
            scope,
            move || page_adapter(adapter_scope, cell, callback),
            |adapter| self.transport.add_listener(adapter.clone()),
        );
    }

    fn unregister_page(&self, scope: &ScopeKey, callback: &Listener) {
        self.page_listeners
            .unregister(ListenerKey::of(callback), scope, |adapter| {
                self.transport.remove_listener(adapter)
            });
    }
}

/// Host-facing closure for a page-scoped registration.
///
/// The identity cell is read at dispatch time, so registrations made
/// before the handshake resolves start matching as soon as it lands.
/// Still-tagged envelopes are in transit to the relay and are not
/// deliverable yet; adapters only match the relayed, untagged form, and
/// the payload reaches the callback with the routing metadata stripped.
fn page_adapter(
    scope: ScopeKey,
    cell: Arc<OnceCell<PageInfo>>,
    callback: Listener,
) -> MessageAdapter {
    Arc::new(
        move |msg: Value, sender: MessageSender| -> BoxFuture<'static, Option<Value>> {
            let addressed_here = cell
                .get()
                .zip(msg.get(envelope::PAGE_ID_FIELD))
                .is_some_and(|(own, raw)| own.page_id.matches(raw));
            let in_transit = envelope::topic_of(&msg)
                .is_some_and(|t| envelope::untag_type(t).is_some());
            let applies = addressed_here
                && !in_transit
                && match &scope {
                    ScopeKey::All => true,
                    ScopeKey::Topic(topic) => {
                        envelope::topic_of(&msg).is_some_and(|t| t == topic)
                    }
                };
            let response = if applies {
                callback(envelope::strip_routing(&msg), sender)
            } else {
                None
            };
            Box::pin(std::future::ready(response))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::TabInfo;
    use crate::test_util::MockBrowser;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tab() -> TabInfo {
        TabInfo {
            id: 1,
            index: 0,
            title: Some("t".into()),
            url: Some("https://x".into()),
            fav_icon_url: Some("https://x/y".into()),
        }
    }

    fn counting_listener() -> (Listener, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let listener_hits = hits.clone();
        let listener: Listener = Arc::new(move |_msg, _sender| {
            listener_hits.fetch_add(1, Ordering::SeqCst);
            None
        });
        (listener, hits)
    }

    fn setup() -> (Arc<MockBrowser>, Messenger) {
        let browser = Arc::new(MockBrowser::new());
        let messenger = Messenger::new(browser.clone());
        (browser, messenger)
    }

    async fn init_as(browser: &MockBrowser, messenger: &Messenger, info: &PageInfo) {
        browser.respond_to(
            envelope::PAGE_INFO_TYPE,
            serde_json::to_value(info).unwrap(),
        );
        messenger.init_client().await.unwrap();
        browser.clear_sent();
    }

    fn page_one() -> PageInfo {
        PageInfo {
            page_id: 1i64.into(),
            favicon_url: None,
            page_title: None,
            page_url: None,
        }
    }

    #[tokio::test]
    async fn handshake_runs_once_and_caches() {
        let (browser, messenger) = setup();
        browser.respond_to(
            envelope::PAGE_INFO_TYPE,
            json!({
                "pageId": "pageId",
                "faviconURL": "faviconURL",
                "pageTitle": "pageTitle",
                "pageURL": "pageURL",
            }),
        );

        let info = messenger.init_client().await.unwrap();
        assert_eq!(info.page_id, "pageId".into());
        assert_eq!(info.favicon_url.as_deref(), Some("faviconURL"));
        assert_eq!(info.page_title.as_deref(), Some("pageTitle"));
        assert_eq!(info.page_url.as_deref(), Some("pageURL"));

        messenger.init_client().await.unwrap();
        assert_eq!(browser.sent().len(), 1, "one handshake on the wire");
        assert_eq!(messenger.page_info(), Some(&info));
    }

    #[tokio::test]
    async fn handshake_decode_failure_surfaces() {
        let (browser, messenger) = setup();
        browser.respond_to(envelope::PAGE_INFO_TYPE, json!({ "nope": true }));

        let err = messenger.init_client().await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn server_answers_tab_handshakes_from_the_tab_descriptor() {
        let (browser, messenger) = setup();
        messenger.init_server();

        let response = browser
            .dispatch_message(
                json!({ "type": envelope::PAGE_INFO_TYPE }),
                MessageSender { tab: Some(tab()) },
            )
            .await;

        assert_eq!(
            response,
            Some(json!({
                "pageId": 1,
                "faviconURL": "https://x/y",
                "pageTitle": "t",
                "pageURL": "https://x",
            }))
        );
    }

    #[tokio::test]
    async fn server_hands_tabless_contexts_the_popup_identity() {
        let (browser, messenger) = setup();
        messenger.init_server();

        let response = browser
            .dispatch_message(
                json!({ "type": envelope::PAGE_INFO_TYPE }),
                MessageSender::default(),
            )
            .await
            .expect("handshake must be answered");

        assert_eq!(response["pageId"], json!("popup"));
    }

    #[tokio::test]
    async fn server_relays_to_the_owning_tab_or_broadcasts() {
        let (browser, messenger) = setup();
        messenger.init_server();

        browser
            .dispatch_message(
                json!({ "type": "_&_MSG_1_&_", "__pageId__": 1 }),
                MessageSender::default(),
            )
            .await;
        browser
            .dispatch_message(
                json!({ "type": "_&_MSG_1_&_", "__pageId__": 1 }),
                MessageSender { tab: Some(tab()) },
            )
            .await;

        let sent = browser.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].target, None);
        assert_eq!(sent[0].message, json!({ "type": "MSG_1", "__pageId__": 1 }));
        assert_eq!(sent[1].target, Some(1));
        assert_eq!(sent[1].message, json!({ "type": "MSG_1", "__pageId__": 1 }));
    }

    #[tokio::test]
    async fn server_ignores_generic_traffic() {
        let (browser, messenger) = setup();
        messenger.init_server();

        let response = browser
            .dispatch_message(json!({ "type": "MSG_1" }), MessageSender::default())
            .await;

        assert_eq!(response, None);
        assert!(browser.sent().is_empty());
    }

    #[tokio::test]
    async fn init_server_is_idempotent() {
        let (browser, messenger) = setup();
        messenger.init_server();
        messenger.init_server();
        assert_eq!(browser.message_add_calls(), 1);
    }

    #[tokio::test]
    async fn page_send_builds_the_tagged_envelope() {
        let (browser, messenger) = setup();
        init_as(&browser, &messenger, &page_one()).await;

        messenger
            .page_send(json!({ "type": "MSG_1", "prop": "value" }))
            .await
            .unwrap();

        let sent = browser.sent();
        assert_eq!(sent[0].target, None);
        assert_eq!(
            sent[0].message,
            json!({ "type": "_&_MSG_1_&_", "__pageId__": 1, "prop": "value" })
        );
    }

    #[tokio::test]
    async fn page_send_guards_its_preconditions() {
        let (browser, messenger) = setup();

        let err = messenger
            .page_send(json!({ "type": "MSG_1" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PageNotInitialised));

        init_as(&browser, &messenger, &page_one()).await;
        let err = messenger
            .page_send(json!({ "prop": "value" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingType));
    }

    #[tokio::test]
    async fn page_listeners_only_fire_for_their_own_identity() {
        let (browser, messenger) = setup();
        init_as(&browser, &messenger, &page_one()).await;

        let (page, page_hits) = counting_listener();
        let (generic, generic_hits) = counting_listener();
        messenger.add_page_listener(page);
        messenger.add_listener(generic);

        browser
            .dispatch_message(
                json!({ "type": "MSG_1", "__pageId__": 1 }),
                MessageSender::default(),
            )
            .await;
        assert_eq!(page_hits.load(Ordering::SeqCst), 1);
        assert_eq!(generic_hits.load(Ordering::SeqCst), 0);

        browser
            .dispatch_message(json!({ "type": "MSG_1" }), MessageSender::default())
            .await;
        assert_eq!(page_hits.load(Ordering::SeqCst), 1);
        assert_eq!(generic_hits.load(Ordering::SeqCst), 1);

        browser
            .dispatch_message(
                json!({ "type": "MSG_1", "__pageId__": 3 }),
                MessageSender::default(),
            )
            .await;
        assert_eq!(page_hits.load(Ordering::SeqCst), 1);
        assert_eq!(generic_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn typed_page_listeners_match_the_relayed_form() {
        let (browser, messenger) = setup();
        init_as(&browser, &messenger, &page_one()).await;

        let (listener, hits) = counting_listener();
        messenger.add_page_topic_listener("MSG_1", listener);

        browser
            .dispatch_message(
                json!({ "type": "MSG_1", "__pageId__": 1 }),
                MessageSender::default(),
            )
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Wrong type, missing type, and the still-tagged in-transit form.
        browser
            .dispatch_message(
                json!({ "type": "MSG_2", "__pageId__": 1 }),
                MessageSender::default(),
            )
            .await;
        browser
            .dispatch_message(json!({ "__pageId__": 1 }), MessageSender::default())
            .await;
        browser
            .dispatch_message(
                json!({ "type": "_&_MSG_1_&_", "__pageId__": 1 }),
                MessageSender::default(),
            )
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delivered_payloads_are_stripped_of_routing_metadata() {
        let (browser, messenger) = setup();
        init_as(&browser, &messenger, &page_one()).await;

        let seen: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: Listener = Arc::new(move |msg, _sender| {
            sink.lock().unwrap().push(msg);
            None
        });
        messenger.add_page_topic_listener("MSG_1", listener);

        browser
            .dispatch_message(
                json!({ "type": "MSG_1", "__pageId__": 1, "prop": "value" }),
                MessageSender::default(),
            )
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], json!({ "type": "MSG_1", "prop": "value" }));
    }

    #[tokio::test]
    async fn registrations_made_before_the_handshake_bind_late() {
        let (browser, messenger) = setup();
        let (listener, hits) = counting_listener();
        messenger.add_page_listener(listener);

        browser
            .dispatch_message(json!({ "__pageId__": 1 }), MessageSender::default())
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 0, "no identity yet");

        init_as(&browser, &messenger, &page_one()).await;
        browser
            .dispatch_message(json!({ "__pageId__": 1 }), MessageSender::default())
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn page_removal_stops_dispatch() {
        let (browser, messenger) = setup();
        init_as(&browser, &messenger, &page_one()).await;

        let (listener, hits) = counting_listener();
        messenger.add_page_listener(listener.clone());

        browser
            .dispatch_message(json!({ "__pageId__": 1 }), MessageSender::default())
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        messenger.remove_page_listener(&listener);
        assert_eq!(browser.message_remove_calls(), 1);

        browser
            .dispatch_message(json!({ "__pageId__": 1 }), MessageSender::default())
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
