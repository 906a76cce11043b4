use std::sync::Arc;

use super::dispatcher::PropagationDispatcher;
use super::resolver::PropagationResolver;
use crate::broadband::{BroadbandSubscriber, Inbound};
use crate::membership::types::NodeId;
use crate::protocol::{QueryResponse, SystemPayload};

/// Routes query responses and propagates to the resolver or the dispatcher.
pub struct QueryResponseManager {
    local_id: NodeId,
    resolver: Arc<PropagationResolver>,
    dispatcher: Arc<PropagationDispatcher>,
    subscriber: Arc<BroadbandSubscriber>,
}

impl QueryResponseManager {
    pub fn new(
        local_id: NodeId,
        resolver: Arc<PropagationResolver>,
        dispatcher: Arc<PropagationDispatcher>,
        subscriber: Arc<BroadbandSubscriber>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            resolver,
            dispatcher,
            subscriber,
        })
    }

    pub async fn start(self: Arc<Self>) {
        let inbound = self.subscriber.subscribe();
        tokio::spawn(async move {
            self.receive_loop(inbound).await;
        });
    }

    pub async fn on_response(&self, from: &NodeId, response: QueryResponse) {
        let issued_here = response.request_publisher_id == self.local_id;

        if issued_here {
            if *from == self.local_id {
                self.resolver
                    .set_primary_response(&response.request_id, response.hash_map);
            } else {
                self.resolver.set_foreign_response(from, response);
            }
        } else if *from == response.request_publisher_id {
            self.dispatcher.set_primary_response(response).await;
        } else if *from == self.local_id {
            self.dispatcher.set_foreign_response(response).await;
        }
        // Third-party answers to third-party requests are none of our business
    }

    async fn receive_loop(self: Arc<Self>, mut inbound: Inbound) {
        while let Some((msg, metadata)) = inbound.recv().await {
            match msg.payload {
                SystemPayload::QueryResponse(response) => {
                    self.on_response(&metadata.publisher_id, response).await;
                }
                SystemPayload::QueryPropagate(propagate) => {
                    self.resolver
                        .on_query_propagate(&metadata.publisher_id, propagate);
                }
                _ => {}
            }
        }
    }
}
