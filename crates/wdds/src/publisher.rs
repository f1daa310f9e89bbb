// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Publisher: groups writers, supplies their default QoS and brackets
//! coherent change sets.
//!
//! Writes performed between `begin_coherent_changes()` and
//! `end_coherent_changes()` carry the same coherent-set id; compatible
//! readers hold the set and apply it atomically. Publishers own their
//! writers: dropping the publisher closes every writer it created.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::types::TopicKind;
use crate::error::{Error, Result};
use crate::flow::{FlowController, FlowControllerConfig};
use crate::participant::{DdsType, ParticipantContext};
use crate::qos::QoS;
use crate::writer::builder::DataWriterBuilder;
use crate::writer::{DataWriter, WriterInner};

/// Coherent-set state shared between a publisher and its writers.
#[derive(Default)]
pub(crate) struct CoherentTracker {
    active: AtomicBool,
    id: AtomicU64,
}

impl CoherentTracker {
    /// Id stamped on changes written right now, if a set is open.
    pub(crate) fn current(&self) -> Option<u64> {
        if self.active.load(Ordering::Acquire) {
            Some(self.id.load(Ordering::Acquire))
        } else {
            None
        }
    }

    fn begin(&self) -> Result<u64> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(Error::PreconditionNotMet(
                "already in a coherent change set".to_string(),
            ));
        }
        Ok(self.id.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn end(&self) -> Result<u64> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Err(Error::PreconditionNotMet(
                "not in a coherent change set".to_string(),
            ));
        }
        Ok(self.id.load(Ordering::Acquire))
    }
}

/// Groups writers under shared default QoS and presentation.
pub struct Publisher {
    participant: Arc<ParticipantContext>,
    default_qos: QoS,
    controller: Arc<FlowController>,
    coherent: Arc<CoherentTracker>,
    writers: Mutex<Vec<Weak<WriterInner>>>,
}

impl Publisher {
    /// Create a publisher with a private default flow controller.
    ///
    /// `default_qos.presentation` is the publisher's presentation context;
    /// with coherent access at topic scope or wider, contained writers must
    /// use keep_all history.
    pub fn new(participant: Arc<ParticipantContext>, default_qos: QoS) -> Result<Arc<Self>> {
        let controller = FlowController::new(
            FlowControllerConfig::default(),
            participant.change_pool(),
        )?;
        Ok(Self::with_controller(participant, default_qos, controller))
    }

    /// Create a publisher whose writers share `controller`.
    #[must_use]
    pub fn with_controller(
        participant: Arc<ParticipantContext>,
        default_qos: QoS,
        controller: Arc<FlowController>,
    ) -> Arc<Self> {
        Arc::new(Self {
            participant,
            default_qos,
            controller,
            coherent: Arc::new(CoherentTracker::default()),
            writers: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn default_qos(&self) -> &QoS {
        &self.default_qos
    }

    /// A writer builder pre-wired with this publisher's controller,
    /// presentation and coherent-set tracker.
    #[must_use]
    pub fn writer_builder<T: DdsType>(
        &self,
        topic_name: impl Into<String>,
        topic_kind: TopicKind,
    ) -> DataWriterBuilder<T> {
        DataWriterBuilder::new(Arc::clone(&self.participant), topic_name, topic_kind)
            .qos(self.default_qos.clone())
            .flow_controller(Arc::clone(&self.controller))
            .publisher_context(self.default_qos.presentation, Arc::clone(&self.coherent))
    }

    /// Create a writer with explicit QoS.
    pub fn create_writer<T: DdsType>(
        &self,
        topic_name: &str,
        topic_kind: TopicKind,
        qos: QoS,
    ) -> Result<DataWriter<T>> {
        let mut qos = qos;
        // Presentation is a publisher-level policy; writers inherit it.
        qos.presentation = self.default_qos.presentation;
        let writer = self
            .writer_builder::<T>(topic_name, topic_kind)
            .qos(qos)
            .build()?;
        self.writers.lock().push(writer.inner_weak());
        Ok(writer)
    }

    /// Create a writer with the publisher's default QoS.
    pub fn create_writer_with_default_qos<T: DdsType>(
        &self,
        topic_name: &str,
        topic_kind: TopicKind,
    ) -> Result<DataWriter<T>> {
        self.create_writer(topic_name, topic_kind, self.default_qos.clone())
    }

    /// Open a coherent change set.
    ///
    /// # Errors
    ///
    /// `IllegalOperation` when the presentation QoS has no coherent access;
    /// `PreconditionNotMet` on nested begins.
    pub fn begin_coherent_changes(&self) -> Result<()> {
        if !self.default_qos.presentation.coherent_access {
            return Err(Error::IllegalOperation(
                "presentation QoS does not enable coherent access".to_string(),
            ));
        }
        let id = self.coherent.begin()?;
        log::debug!("[publisher] begin coherent set {}", id);
        Ok(())
    }

    /// Close the coherent set; samples written since `begin` form one
    /// atomic unit at compatible readers.
    pub fn end_coherent_changes(&self) -> Result<()> {
        let id = self.coherent.end()?;
        log::debug!("[publisher] end coherent set {}", id);
        Ok(())
    }

    /// True while a coherent set is open.
    #[must_use]
    pub fn is_coherent(&self) -> bool {
        self.coherent.current().is_some()
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        // Destruction cascades to the contained writers.
        for writer in self.writers.lock().drain(..) {
            if let Some(inner) = writer.upgrade() {
                inner.close();
            }
        }
    }
}
