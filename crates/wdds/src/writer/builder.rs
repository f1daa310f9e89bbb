// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Fail-fast DataWriter construction.
//!
//! All QoS validation happens at `build()`; a writer that constructs is a
//! writer that can run.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::core::types::{Topic, TopicKind};
use crate::error::{Error, Result};
use crate::flow::{DeliverySink, FlowController, FlowControllerConfig, FlowMode};
use crate::listener::{DataWriterListener, StatusMask};
use crate::participant::{DdsType, ParticipantContext};
use crate::persistence::PersistenceStore;
use crate::publisher::CoherentTracker;
use crate::qos::{Durability, History, Presentation, PublishMode, QoS};

use super::{DataWriter, WriterInner};

/// Builder for [`DataWriter`].
pub struct DataWriterBuilder<T: DdsType> {
    participant: Arc<ParticipantContext>,
    topic_name: String,
    topic_kind: TopicKind,
    qos: QoS,
    controller: Option<Arc<FlowController>>,
    listener: Option<Arc<dyn DataWriterListener>>,
    mask: StatusMask,
    store: Option<Arc<dyn PersistenceStore>>,
    coherent: Option<Arc<CoherentTracker>>,
    publisher_presentation: Option<Presentation>,
    reserved_bytes_per_period: usize,
    auto_enable: bool,
    guid: Option<crate::core::types::Guid>,
    _marker: PhantomData<T>,
}

impl<T: DdsType> DataWriterBuilder<T> {
    #[must_use]
    pub fn new(
        participant: Arc<ParticipantContext>,
        topic_name: impl Into<String>,
        topic_kind: TopicKind,
    ) -> Self {
        Self {
            participant,
            topic_name: topic_name.into(),
            topic_kind,
            qos: QoS::default(),
            controller: None,
            listener: None,
            mask: StatusMask::all(),
            store: None,
            coherent: None,
            publisher_presentation: None,
            reserved_bytes_per_period: 0,
            auto_enable: true,
            guid: None,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn flow_controller(mut self, controller: Arc<FlowController>) -> Self {
        self.controller = Some(controller);
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn DataWriterListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    #[must_use]
    pub fn status_mask(mut self, mask: StatusMask) -> Self {
        self.mask = mask;
        self
    }

    #[must_use]
    pub fn persistence_store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Reserved bytes-per-period share for PriorityWithReservation
    /// controllers.
    #[must_use]
    pub fn reserved_bytes_per_period(mut self, bytes: usize) -> Self {
        self.reserved_bytes_per_period = bytes;
        self
    }

    /// Leave the writer disabled; the caller enables it later.
    #[must_use]
    pub fn manual_enable(mut self) -> Self {
        self.auto_enable = false;
        self
    }

    /// Fix the writer GUID instead of minting one. A persistent writer must
    /// come back with the same GUID to find its samples on restart.
    #[must_use]
    pub fn guid(mut self, guid: crate::core::types::Guid) -> Self {
        self.guid = Some(guid);
        self
    }

    /// Containing-publisher context (coherent-set tracker + presentation).
    pub(crate) fn publisher_context(
        mut self,
        presentation: Presentation,
        coherent: Arc<CoherentTracker>,
    ) -> Self {
        self.publisher_presentation = Some(presentation);
        self.coherent = Some(coherent);
        self
    }

    /// Validate and construct the writer.
    pub fn build(self) -> Result<DataWriter<T>> {
        self.qos
            .validate()
            .map_err(Error::InconsistentPolicy)?;

        // Coherent publishers need keep_all history so a coherent span can
        // never be truncated by depth eviction.
        if let Some(presentation) = self.publisher_presentation {
            if presentation.requires_keep_all() && !matches!(self.qos.history, History::KeepAll) {
                return Err(Error::PreconditionNotMet(
                    "coherent-access publisher requires keep_all history".to_string(),
                ));
            }
        }

        if self.qos.durability == Durability::Persistent && self.store.is_none() {
            return Err(Error::PreconditionNotMet(
                "persistent durability requires a persistence store".to_string(),
            ));
        }

        let controller = match self.controller {
            Some(controller) => controller,
            None => FlowController::new(
                FlowControllerConfig::default(),
                self.participant.change_pool(),
            )?,
        };

        if controller.mode() == FlowMode::PureSync && self.qos.reliability.is_reliable() {
            return Err(Error::InconsistentPolicy(
                "pure-sync flow controllers serve best-effort writers only".to_string(),
            ));
        }
        if self.qos.publish_mode == PublishMode::Asynchronous
            && !controller.mode().is_asynchronous()
        {
            return Err(Error::InconsistentPolicy(
                "asynchronous publish mode requires an async flow controller".to_string(),
            ));
        }

        let topic = Topic::new(self.topic_name, T::type_name(), self.topic_kind);
        let guid = self
            .guid
            .unwrap_or_else(|| self.participant.next_writer_guid());
        let priority = self.qos.transport_priority.value();

        let inner = WriterInner::new(
            guid,
            topic,
            self.qos,
            self.participant,
            Arc::clone(&controller),
            self.listener,
            self.mask,
            self.coherent,
            self.store,
        );

        controller.register_writer(
            Arc::clone(&inner) as Arc<dyn DeliverySink>,
            priority,
            self.reserved_bytes_per_period,
        );

        if self.auto_enable {
            inner.enable()?;
        }
        Ok(DataWriter::from_inner(inner))
    }
}
